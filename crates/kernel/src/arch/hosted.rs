//! Backend that runs kernel threads on host OS threads.
//!
//! Every kernel thread gets its own `std::thread`, but only the holder of the
//! execution baton runs. A switch hands the baton to the target context and
//! parks the caller on its own baton, so exactly one kernel thread executes at
//! any time and the scheduler's decisions are the only ones that matter.
//!
//! Interrupts are whatever code calls [`Kernel::timer_interrupt`] or
//! [`Kernel::irq_enter`] on the running kernel thread, so the mask state is a
//! unit value.
//!
//! [`Kernel::timer_interrupt`]: crate::Kernel::timer_interrupt
//! [`Kernel::irq_enter`]: crate::Kernel::irq_enter

use std::sync::Arc;
use std::thread;

use parking_lot::{Condvar, Mutex};

use super::{Arch, ThreadStart};
use crate::error::{KernelError, KernelResult};

/// Bytes a real port would push as the initial register frame.
const INITIAL_FRAME_BYTES: usize = 64;

/// Host stack reserved for each backing OS thread, independent of the kernel stack.
const HOST_STACK_BYTES: usize = 256 * 1024;

#[derive(Default)]
struct Baton {
    granted: Mutex<bool>,
    cond: Condvar,
}

impl Baton {
    fn release(&self) {
        let mut granted = self.granted.lock();
        *granted = true;
        self.cond.notify_one();
    }

    fn acquire(&self) {
        let mut granted = self.granted.lock();
        while !*granted {
            self.cond.wait(&mut granted);
        }
        *granted = false;
    }
}

/// Saved state of a hosted thread: the baton its OS thread parks on.
#[derive(Clone, Default)]
pub struct HostedContext {
    baton: Arc<Baton>,
}

/// Host OS thread backend.
#[derive(Debug, Default, Clone, Copy)]
pub struct Hosted;

impl Hosted {
    pub fn new() -> Self {
        Self
    }
}

impl Arch for Hosted {
    type Context = HostedContext;
    type IrqState = ();

    fn bootstrap_context(&self) -> HostedContext {
        HostedContext::default()
    }

    fn init_context(&self, entry: ThreadStart, stack: &mut [u8]) -> KernelResult<HostedContext> {
        if stack.len() < INITIAL_FRAME_BYTES {
            return Err(KernelError::InvalidArgs);
        }
        let top = stack.len() - INITIAL_FRAME_BYTES;
        stack[top..].fill(0);

        let context = HostedContext::default();
        let baton = Arc::clone(&context.baton);
        thread::Builder::new()
            .stack_size(HOST_STACK_BYTES.max(stack.len()))
            .spawn(move || {
                baton.acquire();
                entry();
            })
            .map_err(|err| {
                log::warn!("failed to spawn host thread: {err}");
                KernelError::OutOfMemory
            })?;
        Ok(context)
    }

    unsafe fn switch_context(&self, old: &HostedContext, new: &HostedContext) {
        new.baton.release();
        old.baton.acquire();
    }

    unsafe fn exit_context(&self, _old: &HostedContext, new: &HostedContext) {
        new.baton.release();
    }

    fn idle(&self) {
        thread::yield_now();
    }

    fn irq_save(&self) {}

    fn irq_restore(&self, _state: ()) {}

    fn irq_enable(&self) {}
}
