//! Platform abstraction for the kernel's internal locks.
//!
//! Provides unified `Mutex` and `Arc` types that work in both `std` and
//! `no_std` environments. With the `std` feature enabled, uses `parking_lot`.
//! Without it, uses `spin::Mutex`.
//!
//! [`StateGuard`] pairs the kernel state lock with the interrupt mask of the
//! architecture backend, which is the single lock discipline every
//! scheduler structure is mutated under.

use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};

#[cfg(not(feature = "std"))]
pub use alloc::sync::Arc;
#[cfg(feature = "std")]
pub use std::sync::Arc;

use crate::arch::Arch;

#[cfg(feature = "std")]
pub type MutexGuard<'a, T> = parking_lot::MutexGuard<'a, T>;
#[cfg(not(feature = "std"))]
pub type MutexGuard<'a, T> = spin::MutexGuard<'a, T>;

/// Platform-agnostic mutex wrapper.
pub struct Mutex<T> {
    #[cfg(feature = "std")]
    inner: parking_lot::Mutex<T>,
    #[cfg(not(feature = "std"))]
    inner: spin::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex protecting the given value.
    pub fn new(value: T) -> Self {
        Self {
            #[cfg(feature = "std")]
            inner: parking_lot::Mutex::new(value),
            #[cfg(not(feature = "std"))]
            inner: spin::Mutex::new(value),
        }
    }

    /// Acquires the mutex, spinning or parking until it becomes available.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock()
    }
}

/// Kernel state lock held with interrupts masked.
///
/// Dropping the guard unlocks first and restores the saved interrupt state
/// second, so an interrupt can never observe the lock held by the code it
/// interrupted.
pub struct StateGuard<'a, A: Arch, T> {
    guard: ManuallyDrop<MutexGuard<'a, T>>,
    arch: &'a A,
    irq: A::IrqState,
}

impl<'a, A: Arch, T> StateGuard<'a, A, T> {
    pub(crate) fn lock(arch: &'a A, mutex: &'a Mutex<T>) -> Self {
        let irq = arch.irq_save();
        Self {
            guard: ManuallyDrop::new(mutex.lock()),
            arch,
            irq,
        }
    }

    /// Releases the lock but leaves interrupts masked.
    ///
    /// The caller owns the returned state and must hand it back to
    /// [`Arch::irq_restore`] once the critical region (typically a context
    /// switch) is over.
    pub(crate) fn unlock_keep_masked(self) -> A::IrqState {
        let mut this = ManuallyDrop::new(self);
        // SAFETY: `this` is never dropped, so the guard is released exactly once.
        unsafe { ManuallyDrop::drop(&mut this.guard) };
        this.irq
    }
}

impl<A: Arch, T> Deref for StateGuard<'_, A, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<A: Arch, T> DerefMut for StateGuard<'_, A, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<A: Arch, T> Drop for StateGuard<'_, A, T> {
    fn drop(&mut self) {
        // SAFETY: the guard is only taken out here or in `unlock_keep_masked`,
        // which forgets `self` instead of running this destructor.
        unsafe { ManuallyDrop::drop(&mut self.guard) };
        self.arch.irq_restore(self.irq);
    }
}
