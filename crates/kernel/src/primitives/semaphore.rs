use core::fmt;

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult, WakeReason};
use crate::sync::Arc;
use crate::timer::Timeout;
use crate::wait_queue::{WaitQueueId, WaitQueueState};
use crate::Kernel;

pub(crate) struct SemaphoreState {
    pub count: usize,
    pub max: Option<usize>,
    pub queue: WaitQueueId,
}

/// Counting semaphore with an optional ceiling.
pub struct Semaphore<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: usize,
}

impl<A: Arch> Semaphore<A> {
    /// Creates an unbounded semaphore holding `initial` units.
    pub fn new(kernel: &Arc<Kernel<A>>, initial: usize) -> Self {
        Self::create(kernel, initial, None)
    }

    /// Creates a semaphore that refuses to count past `max`.
    pub fn with_max(kernel: &Arc<Kernel<A>>, initial: usize, max: usize) -> KernelResult<Self> {
        if max == 0 || initial > max {
            return Err(KernelError::InvalidArgs);
        }
        Ok(Self::create(kernel, initial, Some(max)))
    }

    fn create(kernel: &Arc<Kernel<A>>, initial: usize, max: Option<usize>) -> Self {
        let mut st = kernel.lock();
        let queue = WaitQueueId(st.wait_queues.insert(WaitQueueState::new()));
        let id = st.semaphores.insert(SemaphoreState {
            count: initial,
            max,
            queue,
        });
        drop(st);
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Takes one unit, blocking while none is available.
    pub fn wait(&self, timeout: Timeout) -> KernelResult<()> {
        let mut st = self.kernel.lock();
        let sem = &mut st.semaphores[self.id];
        if sem.count > 0 {
            sem.count -= 1;
            self.kernel.release(st);
            return Ok(());
        }
        let queue = sem.queue;
        self.kernel.block_on(st, Some(queue), timeout).into_result()
    }

    /// Takes one unit only if it is available right now. Interrupt-safe.
    pub fn try_wait(&self) -> KernelResult<()> {
        self.wait(Timeout::Poll)
    }

    /// Hands one unit to the first waiter, or adds it to the count.
    pub fn signal(&self) -> KernelResult<()> {
        let mut st = self.kernel.lock();
        let queue = st.semaphores[self.id].queue;
        if st.unblock_one(queue, WakeReason::Signaled).is_none() {
            let sem = &mut st.semaphores[self.id];
            if sem.max.is_some_and(|max| sem.count >= max) {
                log::warn!("semaphore {} signaled past its maximum of {}", self.id, sem.count);
                self.kernel.release(st);
                return Err(KernelError::Overflow);
            }
            sem.count += 1;
        }
        self.kernel.reschedule_locked(st);
        Ok(())
    }

    /// Units currently available.
    pub fn count(&self) -> usize {
        self.kernel.lock().semaphores[self.id].count
    }
}

impl<A: Arch> fmt::Debug for Semaphore<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("count", &self.count())
            .finish()
    }
}

impl<A: Arch> Drop for Semaphore<A> {
    fn drop(&mut self) {
        let queue = self
            .kernel
            .lock()
            .semaphores
            .try_remove(self.id)
            .map(|sem| sem.queue);
        if let Some(queue) = queue {
            self.kernel.destroy_wait_queue(queue);
        }
    }
}
