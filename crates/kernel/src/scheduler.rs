//! Dispatch policy: strict priority, round-robin within a level.
//!
//! ## Scheduling Policy
//!
//! 1. The highest-priority ready thread runs; equal priorities run in FIFO order
//! 2. A running thread keeps the processor until it blocks, yields, exits, or
//!    a strictly higher thread becomes ready
//! 3. Each tick consumes one unit of quantum; an exhausted quantum yields to a
//!    ready peer of equal or higher priority at the next interrupt exit
//! 4. A preempted thread with quantum left resumes ahead of its peers
//! 5. Real-time threads never lose the processor to quantum expiry
//! 6. The idle thread runs only when nothing else is ready
//!
//! Every structure here is mutated under the kernel lock with interrupts
//! masked. [`Kernel::switch_away`] is the only place a context switch happens.

use alloc::vec::Vec;

use crate::arch::Arch;
use crate::error::WakeReason;
use crate::kernel::{invariant_violation, KernelGuard, State};
use crate::sync::Arc;
use crate::thread::{Priority, ThreadFlags, ThreadId, ThreadState};
use crate::timer::{deadline_after, next_periodic_deadline, Timeout, TimerAction, TimerCallback};
use crate::trace::records;
use crate::wait_queue::WaitQueueId;
use crate::Kernel;

/// Longest owner chain a priority boost is propagated along.
pub const MAX_INHERITANCE_DEPTH: usize = 8;

impl<C> State<C> {
    /// Puts `id` into the ready queue, ahead of its peers if `front`.
    pub fn make_ready(&mut self, id: ThreadId, front: bool) {
        let thread = self.thread_mut(id);
        thread.state = ThreadState::Ready;
        if thread.is_idle() {
            return;
        }
        let prio = thread.priority;
        debug_assert!(!self.ready.contains(id), "thread {} queued twice", id.0);
        if front {
            self.ready.push_front(id, prio);
        } else {
            self.ready.push_back(id, prio);
        }
    }

    /// True if a ready thread should take the processor from the running one.
    pub fn should_preempt(&self) -> bool {
        let Some(top) = self.ready.max_priority() else {
            return false;
        };
        let current = self.thread(self.current);
        current.is_idle() || top > current.priority
    }

    /// Returns the running thread to the ready queue after a preemption.
    ///
    /// With quantum left it resumes ahead of its peers; an exhausted thread
    /// goes to the back and is refilled when next dispatched.
    pub fn requeue_current(&mut self) {
        let id = self.current;
        let front = self.thread(id).remaining_quantum > 0;
        self.make_ready(id, front);
    }

    /// Moves the running thread into `queue` (or into no queue, for a pure
    /// sleep) and arms its timeout. The caller must switch away next.
    ///
    /// A timeout too long for the tick counter arms nothing and waits like
    /// [`Timeout::Infinite`].
    pub fn block_current(&mut self, queue: Option<WaitQueueId>, timeout: Timeout) {
        let id = self.current;
        if self.irq_depth > 0 {
            invariant_violation(format_args!(
                "thread {} blocking from interrupt context",
                id.0
            ));
        }
        let deadline = match timeout {
            Timeout::Ticks(ticks) => deadline_after(self.now, ticks),
            Timeout::Infinite => None,
            Timeout::Poll => invariant_violation(format_args!("blocking with a poll timeout")),
        };

        let thread = self.thread_mut(id);
        if thread.state != ThreadState::Running || thread.blocked_on.is_some() {
            invariant_violation(format_args!(
                "thread {} blocking while {:?} on {:?}",
                id.0, thread.state, thread.blocked_on
            ));
        }
        thread.state = ThreadState::Blocked;
        thread.wake_reason = None;
        thread.blocked_on = queue;
        let prio = thread.priority;

        if let Some(queue) = queue {
            self.wait_queues[queue.0].waiters.push_back(id, prio);
        }
        if let Some(deadline) = deadline {
            let key = self.timers.insert(deadline, TimerAction::WaitTimeout(id));
            self.thread_mut(id).timeout = Some(key);
        }

        let [a, b, c, d] = id.to_le_bytes();
        self.record(records::sched::BLOCK, &[a, b, c, d]);
    }

    /// Completes a wake for a thread already taken off its wait queue.
    fn finish_wake(&mut self, id: ThreadId, reason: WakeReason) {
        let thread = self.thread_mut(id);
        thread.blocked_on = None;
        thread.wake_reason = Some(reason);
        let timeout = thread.timeout.take();
        if let Some(key) = timeout {
            self.timers.cancel(key);
        }
        self.make_ready(id, false);

        let [a, b, c, d] = id.to_le_bytes();
        self.record(records::sched::WAKE, &[a, b, c, d, reason.code()]);
    }

    /// Moves the first waiter of `queue` to the ready queue. Never dispatches.
    pub fn unblock_one(&mut self, queue: WaitQueueId, reason: WakeReason) -> Option<ThreadId> {
        let id = self.wait_queues[queue.0].waiters.pop()?;
        self.finish_wake(id, reason);
        Some(id)
    }

    /// Moves every waiter of `queue` to the ready queue. Never dispatches.
    pub fn unblock_all(&mut self, queue: WaitQueueId, reason: WakeReason) -> usize {
        let mut woken = 0;
        while self.unblock_one(queue, reason).is_some() {
            woken += 1;
        }
        woken
    }

    /// Takes a blocked thread out of whatever wait queue holds it.
    fn remove_waiter(&mut self, id: ThreadId) {
        let thread = self.thread(id);
        let prio = thread.priority;
        let Some(queue) = thread.blocked_on else {
            return;
        };
        let wait_queue = &mut self.wait_queues[queue.0];
        if !wait_queue.waiters.remove(id, prio) {
            invariant_violation(format_args!(
                "thread {} missing from wait queue {}",
                id.0, queue.0
            ));
        }
        let mutex = wait_queue.mutex;
        if let Some(owner) = mutex.and_then(|mutex| self.mutexes[mutex.0].owner) {
            self.refresh_priority(owner);
        }
    }

    /// Fires every timer due at `self.now`.
    ///
    /// Returns the software timer callbacks to run once the lock is dropped.
    pub fn expire_timers(&mut self) -> Vec<TimerCallback> {
        let mut callbacks = Vec::new();
        let now = self.now;
        while let Some((key, action)) = self.timers.pop_expired(now) {
            match action {
                TimerAction::WaitTimeout(id) => {
                    let Some(thread) = self.threads.get_mut(&id) else {
                        continue;
                    };
                    if thread.state != ThreadState::Blocked || thread.timeout != Some(key) {
                        continue;
                    }
                    thread.timeout = None;
                    self.remove_waiter(id);
                    self.finish_wake(id, WakeReason::TimedOut);
                    self.stats.timeouts += 1;

                    let [a, b, c, d] = id.to_le_bytes();
                    self.record(records::timer::TIMEOUT, &[a, b, c, d]);
                    log::debug!("thread {} timed out at tick {now}", id.0);
                }
                TimerAction::User(slot) => {
                    let Some(timer) = self.user_timers.get_mut(slot) else {
                        continue;
                    };
                    if timer.armed != Some(key) {
                        continue;
                    }
                    timer.armed = None;
                    if timer.period > 0 {
                        if let Some(callback) = &timer.callback {
                            callbacks.push(Arc::clone(callback));
                        }
                        timer.armed = next_periodic_deadline(key.deadline, timer.period, now)
                            .map(|next| self.timers.insert(next, TimerAction::User(slot)));
                    } else if let Some(callback) = timer.callback.take() {
                        callbacks.push(callback);
                    }
                }
            }
        }
        callbacks
    }

    /// Recomputes `id`'s effective priority from its base priority and the
    /// waiters of every mutex it owns, then follows the chain of owners it
    /// is itself blocked behind.
    pub fn refresh_priority(&mut self, id: ThreadId) {
        let mut id = id;
        for _ in 0..MAX_INHERITANCE_DEPTH {
            // An owner that exited without unlocking has nothing left to boost.
            let Some(thread) = self.threads.get(&id) else {
                return;
            };
            let mut target = thread.base_priority;
            for mutex in &thread.owned_mutexes {
                let queue = self.mutexes[mutex.0].queue;
                if let Some(top) = self.wait_queues[queue.0].waiters.max_priority() {
                    target = target.max(top);
                }
            }
            if target == thread.priority {
                return;
            }
            let blocked_on = thread.blocked_on;
            self.set_effective_priority(id, target);

            let owner = blocked_on
                .and_then(|queue| self.wait_queues[queue.0].mutex)
                .and_then(|mutex| self.mutexes[mutex.0].owner);
            match owner {
                Some(owner) => id = owner,
                None => return,
            }
        }
        log::warn!("priority inheritance chain longer than {MAX_INHERITANCE_DEPTH}, truncated");
    }

    /// Changes the effective priority and repositions the thread in whichever
    /// queue holds it.
    fn set_effective_priority(&mut self, id: ThreadId, priority: Priority) {
        let thread = self.thread_mut(id);
        let old = thread.priority;
        if old == priority {
            return;
        }
        thread.priority = priority;
        let state = thread.state;
        let blocked_on = thread.blocked_on;
        let idle = thread.is_idle();

        match state {
            ThreadState::Ready if !idle => {
                self.ready.remove(id, old);
                self.ready.push_back(id, priority);
            }
            ThreadState::Blocked => {
                if let Some(queue) = blocked_on {
                    let waiters = &mut self.wait_queues[queue.0].waiters;
                    waiters.remove(id, old);
                    waiters.push_back(id, priority);
                }
            }
            _ => {}
        }

        log::trace!("thread {} priority {old} -> {priority}", id.0);
        let [a, b, c, d] = id.to_le_bytes();
        self.record(records::thread::PRIORITY, &[a, b, c, d, old.0, priority.0]);
    }
}

impl<A: Arch> Kernel<A> {
    /// Blocks the running thread on `queue` until woken or timed out.
    ///
    /// A poll timeout, or zero ticks, returns [`WakeReason::TimedOut`] without
    /// blocking.
    pub(crate) fn block_on(
        &self,
        mut st: KernelGuard<'_, A>,
        queue: Option<WaitQueueId>,
        timeout: Timeout,
    ) -> WakeReason {
        if matches!(timeout, Timeout::Poll | Timeout::Ticks(0)) {
            self.release(st);
            return WakeReason::TimedOut;
        }
        st.block_current(queue, timeout);
        self.wait_blocked(st)
    }

    /// Switches away from a thread that has just been blocked and returns the
    /// reason it was woken.
    pub(crate) fn wait_blocked(&self, st: KernelGuard<'_, A>) -> WakeReason {
        self.switch_away(st);
        let mut st = self.lock();
        let id = st.current;
        let Some(reason) = st.thread_mut(id).wake_reason.take() else {
            invariant_violation(format_args!("thread {} resumed without a wake", id.0));
        };
        self.release(st);
        reason
    }

    /// Dispatches the highest-priority ready thread.
    ///
    /// The running thread must already have been requeued, blocked or
    /// terminated. Returns once the calling thread runs again (or, for a
    /// terminated thread on a hosted backend, as soon as the switch is made).
    pub(crate) fn switch_away(&self, mut st: KernelGuard<'_, A>) {
        let state = &mut *st;
        let old_id = state.current;
        let Some(new_id) = state.ready.pop().or(state.idle) else {
            invariant_violation(format_args!("no runnable thread"));
        };
        let quantum = state.quantum;
        state.resched_pending = false;

        let new = state.thread_mut(new_id);
        if new.state != ThreadState::Ready {
            invariant_violation(format_args!(
                "dispatching thread {} in state {:?}",
                new_id.0, new.state
            ));
        }
        new.state = ThreadState::Running;
        if new.remaining_quantum == 0 {
            new.remaining_quantum = quantum;
        }
        if new_id == old_id {
            self.release(st);
            return;
        }
        new.schedules += 1;
        let new_is_idle = new.is_idle();
        let new_context = Arc::clone(&new.context);

        let old = state.thread(old_id);
        let old_context = Arc::clone(&old.context);
        let exiting = old.state == ThreadState::Terminated;

        state.current = new_id;
        state.stats.context_switches += 1;
        let [a, b, c, d] = new_id.to_le_bytes();
        let [e, f, g, h] = old_id.to_le_bytes();
        state.record(records::sched::SWITCH, &[a, b, c, d, e, f, g, h]);
        if new_is_idle {
            state.record(records::sched::IDLE, &[e, f, g, h]);
        }
        log::trace!("switch {} -> {}", old_id.0, new_id.0);

        let records = Self::take_records(&mut st);
        let irq = st.unlock_keep_masked();
        self.emit(records);

        if exiting {
            // SAFETY: both contexts come from this backend, `old` is the
            // caller's and `new` was ready, so it is not running.
            unsafe { self.arch.exit_context(&old_context, &new_context) };
            return;
        }
        // SAFETY: as above; the kernel lock is released and interrupts stay
        // masked until this thread resumes.
        unsafe { self.arch.switch_context(&old_context, &new_context) };
        self.arch.irq_restore(irq);
        self.after_switch();
    }

    /// Reschedule point after a release operation.
    ///
    /// Switches if a strictly higher thread is ready. In interrupt context it
    /// only marks the switch pending for [`irq_exit`](Self::irq_exit).
    pub(crate) fn reschedule_locked(&self, mut st: KernelGuard<'_, A>) {
        if !st.should_preempt() {
            self.release(st);
            return;
        }
        if st.irq_depth > 0 {
            st.resched_pending = true;
            self.release(st);
            return;
        }
        st.requeue_current();
        st.stats.preemptions += 1;
        self.switch_away(st);
    }

    /// Gives the processor to a strictly higher-priority ready thread, if any.
    pub fn reschedule(&self) {
        let st = self.lock();
        self.reschedule_locked(st);
    }

    /// Moves the running thread behind its equal-priority peers.
    pub fn yield_now(&self) {
        let mut st = self.lock();
        if st.irq_depth > 0 {
            st.resched_pending = true;
            self.release(st);
            return;
        }
        let state = &mut *st;
        state.stats.yields += 1;
        let id = state.current;
        let thread = state.thread_mut(id);
        thread.remaining_quantum = 0;
        state.make_ready(id, false);
        self.switch_away(st);
    }

    /// Processes one timer period. Interrupt-callable; never blocks.
    ///
    /// Expires due timeouts in the order they were armed, charges the running
    /// thread one tick of quantum and marks a reschedule pending where
    /// warranted. Software timer callbacks run last, outside the lock.
    pub fn timer_tick(&self) {
        let mut st = self.lock();
        let state = &mut *st;
        state.now += 1;
        state.stats.timer_ticks += 1;
        let callbacks = state.expire_timers();

        let current = state.thread_mut(state.current);
        let exempt = current.is_idle() || current.flags.contains(ThreadFlags::REAL_TIME);
        let priority = current.priority;
        if !exempt {
            current.remaining_quantum = current.remaining_quantum.saturating_sub(1);
            let exhausted = current.remaining_quantum == 0;
            if exhausted && state.ready.max_priority() >= Some(priority) {
                state.resched_pending = true;
            }
        }
        if state.should_preempt() {
            state.resched_pending = true;
        }
        if !callbacks.is_empty() {
            let fired = callbacks.len().min(u8::MAX as usize) as u8;
            state.record(records::timer::TICK, &[fired]);
        }
        self.release(st);

        for callback in callbacks {
            callback();
        }
    }

    /// Timer interrupt: [`timer_tick`](Self::timer_tick) bracketed by
    /// interrupt entry and exit, so a pending preemption happens on return.
    pub fn timer_interrupt(&self) {
        self.irq_enter();
        self.timer_tick();
        self.irq_exit();
    }

    /// Marks entry into interrupt context. Calls nest.
    pub fn irq_enter(&self) {
        let mut st = self.lock();
        st.irq_depth += 1;
    }

    /// Marks exit from interrupt context; the outermost exit performs any
    /// pending preemption.
    pub fn irq_exit(&self) {
        let mut st = self.lock();
        if st.irq_depth == 0 {
            invariant_violation(format_args!("irq_exit without matching irq_enter"));
        }
        st.irq_depth -= 1;
        if st.irq_depth > 0 || !st.resched_pending {
            self.release(st);
            return;
        }
        st.resched_pending = false;
        self.preempt(st);
    }

    fn preempt(&self, mut st: KernelGuard<'_, A>) {
        let id = st.current;
        st.requeue_current();
        st.stats.preemptions += 1;
        let [a, b, c, d] = id.to_le_bytes();
        st.record(records::sched::PREEMPT, &[a, b, c, d]);
        self.switch_away(st);
    }

    pub fn in_interrupt(&self) -> bool {
        self.lock().irq_depth > 0
    }

    pub fn reschedule_pending(&self) -> bool {
        self.lock().resched_pending
    }

    /// True where a switch may happen immediately (thread context).
    pub fn can_preempt(&self) -> bool {
        self.lock().irq_depth == 0
    }

    /// Body of the idle thread.
    pub(crate) fn idle_loop(&self) -> ! {
        loop {
            let mut st = self.lock();
            if !st.ready.is_empty() {
                let id = st.current;
                st.make_ready(id, false);
                self.switch_away(st);
                continue;
            }

            if self.config.tickless_idle {
                if let Some(deadline) = st.timers.next_deadline() {
                    // The next tick lands on the deadline.
                    st.now = st.now.max(deadline.saturating_sub(1));
                    self.release(st);
                    self.timer_interrupt();
                    continue;
                }
            }
            self.release(st);

            if let Some(callback) = self.config.idle_callback {
                callback();
            }
            self.arch.idle();
        }
    }

    /// Wakes every waiter with [`WakeReason::Destroyed`] and frees the queue.
    pub(crate) fn destroy_wait_queue(&self, queue: WaitQueueId) {
        let mut st = self.lock();
        let woken = st.unblock_all(queue, WakeReason::Destroyed);
        st.wait_queues.try_remove(queue.0);
        if woken > 0 {
            log::debug!("destroyed wait queue {} with {woken} waiter(s)", queue.0);
        }
        self.reschedule_locked(st);
    }
}
