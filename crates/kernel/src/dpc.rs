//! Deferred procedure calls.
//!
//! Interrupt handlers queue short callbacks here instead of doing the work
//! themselves. A dedicated worker thread at [`Priority::DPC`] drains the
//! queue strictly in FIFO order, one callback at a time, with preemption
//! enabled and the kernel lock released.

use alloc::boxed::Box;
use alloc::collections::VecDeque;

use bitflags::bitflags;

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult};
use crate::primitives::ResetMode;
use crate::sync::Arc;
use crate::thread::{Priority, ThreadConfig};
use crate::timer::Timeout;
use crate::trace::records;
use crate::Kernel;

bitflags! {
    /// Options for [`Kernel::dpc_queue`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DpcFlags: u32 {
        /// Make the worker ready without rescheduling now; it runs at the
        /// next reschedule point.
        const NORESCHED = 1 << 0;
    }
}

/// Deferred callback. Receives the argument it was queued with.
pub type DpcCallback = fn(usize);

#[derive(Clone, Copy)]
pub(crate) struct DpcEntry {
    pub callback: DpcCallback,
    pub arg: usize,
}

pub(crate) struct DpcQueue {
    entries: VecDeque<DpcEntry>,
    capacity: Option<usize>,
    /// Auto-reset event the worker sleeps on.
    pub event: Option<usize>,
}

impl DpcQueue {
    pub fn new(capacity: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
            event: None,
        }
    }

    /// Appends an entry. Returns the queue depth after the push.
    pub fn push(&mut self, entry: DpcEntry) -> KernelResult<usize> {
        if self.capacity.is_some_and(|cap| self.entries.len() >= cap) {
            return Err(KernelError::QueueFull);
        }
        self.entries.push_back(entry);
        Ok(self.entries.len())
    }

    pub fn pop(&mut self) -> Option<DpcEntry> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl<A: Arch> Kernel<A> {
    /// Queues `callback(arg)` for the deferred call worker.
    ///
    /// Interrupt-safe. Fails with [`KernelError::QueueFull`] when a bounded
    /// capacity is configured and exhausted. The worker is always made ready;
    /// [`DpcFlags::NORESCHED`] only suppresses the reschedule that would
    /// otherwise follow.
    pub fn dpc_queue(&self, callback: DpcCallback, arg: usize, flags: DpcFlags) -> KernelResult<()> {
        let mut st = self.lock();
        let depth = match st.dpc.push(DpcEntry { callback, arg }) {
            Ok(depth) => depth,
            Err(err) => {
                let depth = st.dpc.len().min(u16::MAX as usize) as u16;
                st.record(records::dpc::FULL, &depth.to_le_bytes());
                log::warn!("deferred call queue full ({} entries)", st.dpc.len());
                self.release(st);
                return Err(err);
            }
        };
        let depth = depth.min(u16::MAX as usize) as u16;
        st.record(records::dpc::QUEUE, &depth.to_le_bytes());

        if let Some(event) = st.dpc.event {
            st.signal_event(event);
        }
        if flags.contains(DpcFlags::NORESCHED) {
            self.release(st);
        } else {
            self.reschedule_locked(st);
        }
        Ok(())
    }

    /// Entries waiting for the worker.
    pub fn dpc_pending(&self) -> usize {
        self.lock().dpc.len()
    }

    pub(crate) fn start_dpc_worker(self: &Arc<Self>) -> KernelResult<()> {
        let event = self.lock().create_event(false, ResetMode::Auto);
        let kernel = Arc::clone(self);
        let worker = self.create_thread(
            ThreadConfig::new("dpc", Priority::DPC).with_stack_size(self.config.dpc_stack_size),
            Box::new(move || -> i32 { kernel.dpc_loop(event) }),
        )?;

        let mut st = self.lock();
        st.dpc.event = Some(event);
        st.make_ready(worker, false);
        self.release(st);
        Ok(())
    }

    fn dpc_loop(&self, event: usize) -> ! {
        loop {
            if let Err(err) = self.event_wait(event, Timeout::Infinite) {
                log::error!("deferred call worker wait failed: {err}");
                continue;
            }
            loop {
                let mut st = self.lock();
                let Some(entry) = st.dpc.pop() else {
                    self.release(st);
                    break;
                };
                st.stats.dpcs_run += 1;
                st.record(records::dpc::RUN, &[]);
                self.release(st);

                (entry.callback)(entry.arg);
            }
        }
    }
}
