//! Tick-driven timer queue: blocking timeouts and software timers.

use alloc::collections::BTreeMap;
use core::fmt;
use core::time::Duration;

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult};
use crate::sync::Arc;
use crate::thread::ThreadId;
use crate::Kernel;

/// How long a blocking call may wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Do not block; fail with a timeout if the call cannot complete at once.
    Poll,
    /// Give up after this many ticks.
    Ticks(u64),
    /// Wait until satisfied.
    Infinite,
}

impl Timeout {
    /// Converts a duration to ticks at `tick_hz`, rounding up.
    pub fn from_duration(duration: Duration, tick_hz: u32) -> Self {
        if duration.is_zero() {
            return Self::Poll;
        }
        let nanos = duration.as_nanos();
        let per_tick = 1_000_000_000u128 / u128::from(tick_hz.max(1));
        let ticks = nanos.div_ceil(per_tick.max(1));
        Self::Ticks(u64::try_from(ticks).unwrap_or(u64::MAX))
    }
}

/// Position of an armed entry: its deadline plus a sequence number, which
/// keeps entries expiring on the same tick in the order they were armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TimerKey {
    pub deadline: u64,
    seq: u64,
}

/// What happens when an entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerAction {
    /// Wake a blocked thread with a timeout.
    WaitTimeout(ThreadId),
    /// Fire a software timer.
    User(usize),
}

#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: BTreeMap<TimerKey, TimerAction>,
    next_seq: u64,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, deadline: u64, action: TimerAction) -> TimerKey {
        let key = TimerKey {
            deadline,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, action);
        key
    }

    pub fn cancel(&mut self, key: TimerKey) -> Option<TimerAction> {
        self.entries.remove(&key)
    }

    /// Removes and returns the earliest entry due at or before `now`.
    pub fn pop_expired(&mut self, now: u64) -> Option<(TimerKey, TimerAction)> {
        let entry = self.entries.first_entry()?;
        if entry.key().deadline > now {
            return None;
        }
        let key = *entry.key();
        Some((key, entry.remove()))
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.keys().next().map(|key| key.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Callback run when a software timer fires, in interrupt context.
pub type TimerCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Kernel-side record of a software timer.
#[derive(Default)]
pub(crate) struct TimerSlot {
    pub armed: Option<TimerKey>,
    /// Zero for one-shot timers.
    pub period: u64,
    pub callback: Option<TimerCallback>,
}

/// Software timer backed by the kernel's timer queue.
///
/// Callbacks run from [`Kernel::timer_tick`] after the kernel's own
/// bookkeeping, outside the kernel lock; they may signal primitives and queue
/// deferred calls but must not block. Dropping the timer cancels it.
pub struct Timer<A: Arch> {
    kernel: Arc<Kernel<A>>,
    slot: usize,
}

impl<A: Arch> Timer<A> {
    pub fn new(kernel: &Arc<Kernel<A>>) -> Self {
        let slot = kernel.lock().user_timers.insert(TimerSlot::default());
        Self {
            kernel: Arc::clone(kernel),
            slot,
        }
    }

    /// Fires `callback` once after `delay` ticks, replacing any armed schedule.
    /// A zero delay fires on the next tick. A delay reaching past the end of
    /// the tick counter never fires and leaves the timer disarmed.
    pub fn set_oneshot<F>(&self, delay: u64, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.arm(delay, 0, Arc::new(callback));
    }

    /// Fires `callback` every `period` ticks, starting `delay` ticks from now.
    pub fn set_periodic<F>(&self, delay: u64, period: u64, callback: F) -> KernelResult<()>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period == 0 {
            return Err(KernelError::InvalidArgs);
        }
        self.arm(delay, period, Arc::new(callback));
        Ok(())
    }

    /// Disarms the timer. Returns true if it was armed.
    pub fn cancel(&self) -> bool {
        let mut st = self.kernel.lock();
        let Some(slot) = st.user_timers.get_mut(self.slot) else {
            return false;
        };
        slot.callback = None;
        match slot.armed.take() {
            Some(key) => st.timers.cancel(key).is_some(),
            None => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        let st = self.kernel.lock();
        st.user_timers
            .get(self.slot)
            .is_some_and(|slot| slot.armed.is_some())
    }

    fn arm(&self, delay: u64, period: u64, callback: TimerCallback) {
        let mut st = self.kernel.lock();
        if let Some(old) = st.user_timers[self.slot].armed.take() {
            st.timers.cancel(old);
        }
        let key = match deadline_after(st.now, delay) {
            Some(deadline) => Some(st.timers.insert(deadline, TimerAction::User(self.slot))),
            None => {
                log::debug!("timer {} delay {delay} lies past the tick range", self.slot);
                None
            }
        };
        let slot = &mut st.user_timers[self.slot];
        slot.armed = key;
        slot.period = period;
        slot.callback = Some(callback);
    }
}

impl<A: Arch> fmt::Debug for Timer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer").field("slot", &self.slot).finish()
    }
}

impl<A: Arch> Drop for Timer<A> {
    fn drop(&mut self) {
        let mut st = self.kernel.lock();
        if let Some(slot) = st.user_timers.try_remove(self.slot) {
            if let Some(key) = slot.armed {
                st.timers.cancel(key);
            }
        }
    }
}

/// Tick on which something `ticks` from `now` falls due, never `now` itself.
///
/// `None` when that tick lies beyond the counter; such a wait never expires.
pub(crate) fn deadline_after(now: u64, ticks: u64) -> Option<u64> {
    now.checked_add(ticks.max(1)).filter(|&deadline| deadline < u64::MAX)
}

/// Next deadline for a periodic timer that fired at `deadline`.
///
/// Keeps the original phase unless the timer has fallen behind, in which case
/// it is rescheduled a full period from now. `None` once the next firing no
/// longer fits the tick counter.
pub(crate) fn next_periodic_deadline(deadline: u64, period: u64, now: u64) -> Option<u64> {
    match deadline.checked_add(period) {
        Some(next) if next > now => Some(next).filter(|&next| next < u64::MAX),
        _ => deadline_after(now, period),
    }
}
