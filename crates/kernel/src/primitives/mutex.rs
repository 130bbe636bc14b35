//! Non-recursive mutex with transitive priority inheritance.

use core::fmt;

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult, WakeReason};
use crate::kernel::State;
use crate::scheduler::MAX_INHERITANCE_DEPTH;
use crate::sync::Arc;
use crate::thread::ThreadId;
use crate::timer::Timeout;
use crate::wait_queue::{WaitQueueId, WaitQueueState};
use crate::Kernel;

/// Slab index of a mutex inside the kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct MutexId(pub usize);

pub(crate) struct MutexState {
    pub owner: Option<ThreadId>,
    pub queue: WaitQueueId,
}

impl<C> State<C> {
    /// True if `target` appears in the chain of owners `start` is blocked behind.
    fn owner_chain_reaches(&self, start: ThreadId, target: ThreadId) -> bool {
        let mut id = start;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            let next = self
                .threads
                .get(&id)
                .and_then(|thread| thread.blocked_on)
                .and_then(|queue| self.wait_queues[queue.0].mutex)
                .and_then(|mutex| self.mutexes[mutex.0].owner);
            match next {
                Some(owner) if owner == target => return true,
                Some(owner) => id = owner,
                None => return false,
            }
        }
        false
    }
}

/// Mutual exclusion lock owned by at most one thread.
///
/// While a thread waits, the owner runs at no lower than the waiter's
/// priority, and so does every owner the owner is itself blocked behind, up
/// to [`MAX_INHERITANCE_DEPTH`] links. The boost is dropped on unlock.
/// Unlocking hands ownership straight to the highest-priority waiter.
pub struct Mutex<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: MutexId,
}

impl<A: Arch> Mutex<A> {
    pub fn new(kernel: &Arc<Kernel<A>>) -> Self {
        let mut st = kernel.lock();
        let state = &mut *st;
        let entry = state.mutexes.vacant_entry();
        let id = MutexId(entry.key());
        let queue = WaitQueueId(state.wait_queues.insert(WaitQueueState::for_mutex(id)));
        entry.insert(MutexState { owner: None, queue });
        drop(st);
        Self {
            kernel: Arc::clone(kernel),
            id,
        }
    }

    /// Acquires the mutex, blocking while another thread owns it.
    ///
    /// Fails with [`KernelError::Deadlock`] if the caller already owns it, or
    /// if the owner is (transitively) waiting for the caller.
    pub fn lock(&self, timeout: Timeout) -> KernelResult<()> {
        let mut st = self.kernel.lock();
        let state = &mut *st;
        let current = state.current;
        let mutex = &mut state.mutexes[self.id.0];
        let queue = mutex.queue;

        let owner = match mutex.owner {
            None => {
                mutex.owner = Some(current);
                state.thread_mut(current).owned_mutexes.push(self.id);
                self.kernel.release(st);
                return Ok(());
            }
            Some(owner) if owner == current => return Err(KernelError::Deadlock),
            Some(owner) => owner,
        };
        if state.owner_chain_reaches(owner, current) {
            log::warn!("mutex {} lock by thread {} would deadlock", self.id.0, current.0);
            return Err(KernelError::Deadlock);
        }
        if matches!(timeout, Timeout::Poll | Timeout::Ticks(0)) {
            self.kernel.release(st);
            return Err(KernelError::TimedOut);
        }

        state.block_current(Some(queue), timeout);
        state.refresh_priority(owner);
        self.kernel.wait_blocked(st).into_result()
    }

    /// Acquires the mutex only if it is free right now.
    pub fn try_lock(&self) -> KernelResult<()> {
        self.lock(Timeout::Poll)
    }

    /// Releases the mutex, restoring the caller's own priority.
    pub fn unlock(&self) -> KernelResult<()> {
        let mut st = self.kernel.lock();
        let state = &mut *st;
        let current = state.current;
        let mutex = &state.mutexes[self.id.0];
        if mutex.owner != Some(current) {
            return Err(KernelError::NotOwner);
        }
        let queue = mutex.queue;
        state
            .thread_mut(current)
            .owned_mutexes
            .retain(|&owned| owned != self.id);

        match state.unblock_one(queue, WakeReason::Signaled) {
            Some(next) => {
                state.mutexes[self.id.0].owner = Some(next);
                state.thread_mut(next).owned_mutexes.push(self.id);
                state.refresh_priority(next);
            }
            None => state.mutexes[self.id.0].owner = None,
        }
        state.refresh_priority(current);
        self.kernel.reschedule_locked(st);
        Ok(())
    }

    /// Current owner, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        self.kernel.lock().mutexes[self.id.0].owner
    }

    pub fn is_locked(&self) -> bool {
        self.owner().is_some()
    }
}

impl<A: Arch> fmt::Debug for Mutex<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id.0)
            .field("owner", &self.owner())
            .finish()
    }
}

impl<A: Arch> Drop for Mutex<A> {
    fn drop(&mut self) {
        let mut st = self.kernel.lock();
        let state = &mut *st;
        if let Some(mutex) = state.mutexes.try_remove(self.id.0) {
            let owner = mutex
                .owner
                .filter(|owner| state.threads.contains_key(owner));
            if let Some(owner) = owner {
                state
                    .thread_mut(owner)
                    .owned_mutexes
                    .retain(|&owned| owned != self.id);
            }
            state.unblock_all(mutex.queue, WakeReason::Destroyed);
            state.wait_queues.try_remove(mutex.queue.0);
            if let Some(owner) = owner {
                state.refresh_priority(owner);
            }
        }
        self.kernel.reschedule_locked(st);
    }
}
