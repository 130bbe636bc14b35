//! Architecture context backend.
//!
//! The scheduler is portable; everything it needs from the CPU goes through
//! [`Arch`]. A backend owns the layout of the saved machine state and the
//! mechanics of moving between two of them. It never makes a scheduling
//! decision.

#[cfg(feature = "hosted")]
mod hosted;
#[cfg(feature = "hosted")]
pub use hosted::{Hosted, HostedContext};

use alloc::boxed::Box;

use crate::error::KernelResult;

/// Code a fresh context begins executing. It never returns into the backend
/// except through [`Arch::exit_context`].
pub type ThreadStart = Box<dyn FnOnce() + Send + 'static>;

/// Contract every architecture backend satisfies.
///
/// Contexts are shared between the scheduler's thread table and the switch
/// site, so they carry interior mutability rather than being handed out as
/// `&mut`.
pub trait Arch: Send + Sync + 'static {
    /// Saved state needed to resume a thread.
    type Context: Send + Sync + 'static;
    /// Interrupt mask state returned by [`Arch::irq_save`].
    type IrqState: Copy + Send;

    /// Adopts the flow of control that booted the kernel as the first thread.
    fn bootstrap_context(&self) -> Self::Context;

    /// Prepares a context that starts `entry` on `stack` when first switched to.
    fn init_context(&self, entry: ThreadStart, stack: &mut [u8]) -> KernelResult<Self::Context>;

    /// Saves the running state into `old` and resumes `new`.
    ///
    /// Returns when some later switch resumes `old`.
    ///
    /// # Safety
    ///
    /// `old` must be the context of the calling thread, `new` must have been
    /// produced by this backend and must not be running. Interrupts are masked.
    unsafe fn switch_context(&self, old: &Self::Context, new: &Self::Context);

    /// Resumes `new` and abandons `old` for good.
    ///
    /// A backend with real stacks never returns from this call. A backend
    /// whose threads are hosted by something else may return, in which case
    /// the caller unwinds straight out of the thread's entry.
    ///
    /// # Safety
    ///
    /// Same as [`Arch::switch_context`]; `old` is never resumed again.
    unsafe fn exit_context(&self, old: &Self::Context, new: &Self::Context);

    /// Waits for the next interrupt.
    fn idle(&self);

    /// Masks interrupts and returns the previous mask state.
    fn irq_save(&self) -> Self::IrqState;

    /// Restores a mask state returned by [`Arch::irq_save`].
    fn irq_restore(&self, state: Self::IrqState);

    /// Unmasks interrupts. Called once at the top of every new thread.
    fn irq_enable(&self);
}
