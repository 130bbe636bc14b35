//! Wait queues: the blocked-thread collections behind every primitive, and a
//! public condition-style wait object built directly on one.

use core::fmt;

use crate::arch::Arch;
use crate::error::{KernelResult, WakeReason};
use crate::primitives::MutexId;
use crate::runqueue::PrioQueue;
use crate::sync::Arc;
use crate::timer::Timeout;
use crate::Kernel;

/// Slab index of a wait queue inside the kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WaitQueueId(pub usize);

/// Threads blocked on one object, highest priority first, FIFO within a level.
#[derive(Default)]
pub(crate) struct WaitQueueState {
    pub waiters: PrioQueue,
    /// Mutex this queue belongs to, for priority inheritance.
    pub mutex: Option<MutexId>,
}

impl WaitQueueState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_mutex(mutex: MutexId) -> Self {
        Self {
            waiters: PrioQueue::new(),
            mutex: Some(mutex),
        }
    }
}

/// Condition-style wait object.
///
/// Carries no state of its own: [`wait`](Self::wait) always blocks until a
/// wake, a timeout or destruction. Dropping it wakes every waiter with
/// [`KernelError::Destroyed`](crate::KernelError::Destroyed).
pub struct WaitQueue<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: WaitQueueId,
}

impl<A: Arch> WaitQueue<A> {
    pub fn new(kernel: &Arc<Kernel<A>>) -> Self {
        let id = WaitQueueId(kernel.lock().wait_queues.insert(WaitQueueState::new()));
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Blocks the running thread until woken.
    pub fn wait(&self, timeout: Timeout) -> KernelResult<()> {
        let st = self.kernel.lock();
        self.kernel.block_on(st, Some(self.id), timeout).into_result()
    }

    /// Wakes the longest-waiting thread of the highest priority.
    /// Returns false if nobody was waiting.
    pub fn wake_one(&self) -> bool {
        let mut st = self.kernel.lock();
        let woke = st.unblock_one(self.id, WakeReason::Signaled).is_some();
        self.kernel.reschedule_locked(st);
        woke
    }

    /// Wakes every waiter. Returns how many were woken.
    pub fn wake_all(&self) -> usize {
        let mut st = self.kernel.lock();
        let woke = st.unblock_all(self.id, WakeReason::Signaled);
        self.kernel.reschedule_locked(st);
        woke
    }

    /// Number of threads currently blocked here.
    pub fn waiters(&self) -> usize {
        self.kernel.lock().wait_queues[self.id.0].waiters.len()
    }
}

impl<A: Arch> fmt::Debug for WaitQueue<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitQueue").field("id", &self.id.0).finish()
    }
}

impl<A: Arch> Drop for WaitQueue<A> {
    fn drop(&mut self) {
        self.kernel.destroy_wait_queue(self.id);
    }
}
