use core::fmt;

use crate::arch::Arch;
use crate::error::{KernelResult, WakeReason};
use crate::kernel::State;
use crate::sync::Arc;
use crate::timer::Timeout;
use crate::wait_queue::{WaitQueueId, WaitQueueState};
use crate::Kernel;

/// What a signal does to the signaled flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays signaled, releasing every waiter, until explicitly unsignaled.
    Manual,
    /// Releases one waiter and consumes the signal in doing so.
    Auto,
}

pub(crate) struct EventState {
    pub signaled: bool,
    pub mode: ResetMode,
    pub queue: WaitQueueId,
}

impl<C> State<C> {
    pub fn create_event(&mut self, signaled: bool, mode: ResetMode) -> usize {
        let queue = WaitQueueId(self.wait_queues.insert(WaitQueueState::new()));
        self.events.insert(EventState {
            signaled,
            mode,
            queue,
        })
    }

    pub fn signal_event(&mut self, id: usize) {
        let event = &mut self.events[id];
        let queue = event.queue;
        match event.mode {
            ResetMode::Manual => {
                event.signaled = true;
                self.unblock_all(queue, WakeReason::Signaled);
            }
            ResetMode::Auto => {
                if self.unblock_one(queue, WakeReason::Signaled).is_none() {
                    self.events[id].signaled = true;
                }
            }
        }
    }
}

impl<A: Arch> Kernel<A> {
    pub(crate) fn event_wait(&self, id: usize, timeout: Timeout) -> KernelResult<()> {
        let mut st = self.lock();
        let event = &mut st.events[id];
        if event.signaled {
            if event.mode == ResetMode::Auto {
                event.signaled = false;
            }
            self.release(st);
            return Ok(());
        }
        let queue = event.queue;
        self.block_on(st, Some(queue), timeout).into_result()
    }
}

/// Signalable event, manual or auto reset.
pub struct Event<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: usize,
}

impl<A: Arch> Event<A> {
    pub fn new(kernel: &Arc<Kernel<A>>, signaled: bool, mode: ResetMode) -> Self {
        let id = kernel.lock().create_event(signaled, mode);
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Sets the event, releasing waiters according to its reset mode.
    pub fn signal(&self) {
        let mut st = self.kernel.lock();
        st.signal_event(self.id);
        self.kernel.reschedule_locked(st);
    }

    /// Clears the signaled flag.
    pub fn unsignal(&self) {
        self.kernel.lock().events[self.id].signaled = false;
    }

    /// Blocks while the event is unsignaled.
    pub fn wait(&self, timeout: Timeout) -> KernelResult<()> {
        self.kernel.event_wait(self.id, timeout)
    }

    pub fn is_signaled(&self) -> bool {
        self.kernel.lock().events[self.id].signaled
    }
}

impl<A: Arch> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event").field("id", &self.id).finish()
    }
}

impl<A: Arch> Drop for Event<A> {
    fn drop(&mut self) {
        let queue = self
            .kernel
            .lock()
            .events
            .try_remove(self.id)
            .map(|event| event.queue);
        if let Some(queue) = queue {
            self.kernel.destroy_wait_queue(queue);
        }
    }
}
