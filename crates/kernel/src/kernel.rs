//! Kernel instance: boot, thread lifecycle and diagnostics.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use core::mem;

use slab::Slab;

use crate::arch::{Arch, ThreadStart};
use crate::config::KernelConfig;
use crate::dpc::DpcQueue;
use crate::error::{KernelError, KernelResult, WakeReason};
use crate::primitives::{
    EventState, MutexState, PortGroupState, ReadPortState, SemaphoreState, WritePortState,
};
use crate::runqueue::PrioQueue;
use crate::stack::StackPool;
use crate::sync::{Arc, Mutex, StateGuard};
use crate::thread::{
    Priority, Thread, ThreadConfig, ThreadEntry, ThreadFlags, ThreadHandle, ThreadId, ThreadInfo,
    ThreadState,
};
use crate::timer::{Timeout, TimerQueue, TimerSlot};
use crate::trace::{records, PendingRecord, TraceHook};
use crate::wait_queue::{WaitQueueId, WaitQueueState};

/// Counters maintained by the scheduler.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct KernelStats {
    pub context_switches: u64,
    pub preemptions: u64,
    pub yields: u64,
    pub timer_ticks: u64,
    pub timeouts: u64,
    pub dpcs_run: u64,
}

/// Everything the scheduler mutates, guarded by the single kernel lock.
pub(crate) struct State<C> {
    pub threads: BTreeMap<ThreadId, Thread<C>>,
    pub ready: PrioQueue,
    pub current: ThreadId,
    pub idle: Option<ThreadId>,
    next_thread_id: u32,
    pub wait_queues: Slab<WaitQueueState>,
    pub semaphores: Slab<SemaphoreState>,
    pub mutexes: Slab<MutexState>,
    pub events: Slab<EventState>,
    pub write_ports: Slab<WritePortState>,
    pub read_ports: Slab<ReadPortState>,
    pub port_groups: Slab<PortGroupState>,
    pub timers: TimerQueue,
    pub user_timers: Slab<TimerSlot>,
    /// Ticks since boot.
    pub now: u64,
    pub irq_depth: u32,
    pub resched_pending: bool,
    pub dpc: DpcQueue,
    pub stacks: StackPool,
    pub stats: KernelStats,
    /// Detached threads that terminated and wait to be released.
    pub reap: Vec<ThreadId>,
    pub quantum: u32,
    tracing: bool,
    trace: Vec<PendingRecord>,
}

impl<C> State<C> {
    fn new(config: &KernelConfig, tracing: bool) -> Self {
        Self {
            threads: BTreeMap::new(),
            ready: PrioQueue::new(),
            current: ThreadId(0),
            idle: None,
            next_thread_id: 0,
            wait_queues: Slab::new(),
            semaphores: Slab::new(),
            mutexes: Slab::new(),
            events: Slab::new(),
            write_ports: Slab::new(),
            read_ports: Slab::new(),
            port_groups: Slab::new(),
            timers: TimerQueue::new(),
            user_timers: Slab::new(),
            now: 0,
            irq_depth: 0,
            resched_pending: false,
            dpc: DpcQueue::new(config.dpc_capacity),
            stacks: StackPool::new(config.stack_budget),
            stats: KernelStats::default(),
            reap: Vec::new(),
            quantum: config.quantum_ticks.max(1),
            tracing,
            trace: Vec::new(),
        }
    }

    fn allocate_id(&mut self) -> ThreadId {
        let id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;
        id
    }

    /// Queues a trace record for emission once the lock is released.
    pub fn record(&mut self, record: u8, fields: &[u8]) {
        if self.tracing {
            self.trace.push(PendingRecord::new(record, fields));
        }
    }

    pub fn thread(&self, id: ThreadId) -> &Thread<C> {
        match self.threads.get(&id) {
            Some(thread) => thread,
            None => invariant_violation(format_args!("unknown thread {id:?}")),
        }
    }

    pub fn thread_mut(&mut self, id: ThreadId) -> &mut Thread<C> {
        match self.threads.get_mut(&id) {
            Some(thread) => thread,
            None => invariant_violation(format_args!("unknown thread {id:?}")),
        }
    }

    /// Frees a terminated thread's control block, stack and join queue.
    pub fn release_thread(&mut self, id: ThreadId) {
        let Some(mut thread) = self.threads.remove(&id) else {
            return;
        };
        if let Some(stack) = thread.stack.take() {
            self.stacks.release(stack);
        }
        self.wait_queues.try_remove(thread.joiners.0);
        log::debug!("released thread {} '{}'", id.0, thread.name);
    }
}

/// Halts on a broken scheduler invariant.
#[cold]
pub(crate) fn invariant_violation(what: fmt::Arguments<'_>) -> ! {
    log::error!("kernel invariant violated: {what}");
    panic!("kernel invariant violated: {what}");
}

pub(crate) type KernelGuard<'a, A> = StateGuard<'a, A, State<<A as Arch>::Context>>;

/// Builder for booting a kernel instance.
pub struct KernelBuilder<A: Arch> {
    arch: A,
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl<A: Arch> KernelBuilder<A> {
    pub fn new(arch: A) -> Self {
        Self {
            arch,
            config: KernelConfig::default(),
            trace: None,
        }
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the trace hook for kernel events.
    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Boots the kernel. See [`Kernel::boot`].
    pub fn boot(self) -> KernelResult<Arc<Kernel<A>>> {
        Kernel::start(self.arch, self.config, self.trace)
    }
}

/// A kernel instance: one scheduler, its threads and primitives.
///
/// Instances are independent of each other; there is no global kernel.
pub struct Kernel<A: Arch> {
    pub(crate) arch: A,
    pub(crate) config: KernelConfig,
    state: Mutex<State<A::Context>>,
    trace: Option<TraceHook>,
}

impl<A: Arch> Kernel<A> {
    pub fn builder(arch: A) -> KernelBuilder<A> {
        KernelBuilder::new(arch)
    }

    /// Boots a kernel with `config`.
    ///
    /// The calling flow becomes the bootstrap thread at
    /// [`Priority::DEFAULT`]. The idle thread and the deferred call worker are
    /// created ready; neither runs until the bootstrap thread reaches a
    /// reschedule point.
    pub fn boot(arch: A, config: KernelConfig) -> KernelResult<Arc<Self>> {
        Self::start(arch, config, None)
    }

    fn start(arch: A, config: KernelConfig, trace: Option<TraceHook>) -> KernelResult<Arc<Self>> {
        let state = State::new(&config, trace.is_some());
        let kernel = Arc::new(Self {
            arch,
            config,
            state: Mutex::new(state),
            trace,
        });

        {
            let mut st = kernel.lock();
            let state = &mut *st;
            let id = state.allocate_id();
            let joiners = WaitQueueId(state.wait_queues.insert(WaitQueueState::new()));
            let context = Arc::new(kernel.arch.bootstrap_context());
            let mut thread = Thread::new(
                String::from("bootstrap"),
                Priority::DEFAULT,
                context,
                None,
                joiners,
                state.quantum,
            );
            thread.state = ThreadState::Running;
            thread.schedules = 1;
            state.threads.insert(id, thread);
            state.current = id;
        }

        let idle = kernel.create_thread(
            ThreadConfig::new("idle", Priority::IDLE),
            Box::new({
                let kernel = Arc::clone(&kernel);
                move || -> i32 { kernel.idle_loop() }
            }),
        )?;
        {
            let mut st = kernel.lock();
            let thread = st.thread_mut(idle);
            thread.flags |= ThreadFlags::IDLE | ThreadFlags::DETACHED;
            thread.state = ThreadState::Ready;
            st.idle = Some(idle);
        }

        kernel.start_dpc_worker()?;

        log::info!(
            "kernel '{}' booted: quantum {} ticks, {} Hz",
            kernel.config.name,
            kernel.config.quantum_ticks,
            kernel.config.tick_hz
        );
        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn trace_hook(&self) -> Option<TraceHook> {
        self.trace.clone()
    }

    pub(crate) fn lock(&self) -> KernelGuard<'_, A> {
        StateGuard::lock(&self.arch, &self.state)
    }

    /// Drops the lock, then hands the records queued under it to the trace hook.
    pub(crate) fn release(&self, mut st: KernelGuard<'_, A>) {
        let records = mem::take(&mut st.trace);
        drop(st);
        self.emit(records);
    }

    pub(crate) fn take_records(st: &mut KernelGuard<'_, A>) -> Vec<PendingRecord> {
        mem::take(&mut st.trace)
    }

    pub(crate) fn emit(&self, records: Vec<PendingRecord>) {
        if let Some(trace) = &self.trace {
            for record in &records {
                let _ = trace(record.record, record.payload(), true);
            }
        }
    }

    /// Creates a ready thread running `entry`. Does not dispatch it.
    pub fn spawn<F>(self: &Arc<Self>, config: ThreadConfig, entry: F) -> KernelResult<ThreadHandle<A>>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let id = self.create_thread(config, Box::new(entry))?;
        let mut st = self.lock();
        st.make_ready(id, false);
        self.release(st);
        Ok(ThreadHandle::new(Arc::clone(self), id))
    }

    /// Creates a thread that stays suspended until [`ThreadHandle::resume`].
    pub fn spawn_suspended<F>(
        self: &Arc<Self>,
        config: ThreadConfig,
        entry: F,
    ) -> KernelResult<ThreadHandle<A>>
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        let id = self.create_thread(config, Box::new(entry))?;
        let mut st = self.lock();
        st.thread_mut(id).state = ThreadState::Suspended;
        self.release(st);
        Ok(ThreadHandle::new(Arc::clone(self), id))
    }

    pub(crate) fn create_thread(
        self: &Arc<Self>,
        config: ThreadConfig,
        entry: ThreadEntry,
    ) -> KernelResult<ThreadId> {
        if !config.priority.is_valid() {
            return Err(KernelError::InvalidArgs);
        }
        let stack_size = config.stack_size.unwrap_or(self.config.default_stack_size);

        let mut st = self.lock();
        let state = &mut *st;
        if state.threads.len() >= self.config.max_threads {
            log::warn!("thread table full, cannot spawn '{}'", config.name);
            return Err(KernelError::OutOfMemory);
        }
        let mut stack = state.stacks.allocate(stack_size)?;

        let kernel = Arc::clone(self);
        let start: ThreadStart = Box::new(move || kernel.thread_main(entry));
        let context = match self.arch.init_context(start, stack.as_mut_slice()) {
            Ok(context) => context,
            Err(err) => {
                state.stacks.release(stack);
                return Err(err);
            }
        };

        let id = state.allocate_id();
        let joiners = WaitQueueId(state.wait_queues.insert(WaitQueueState::new()));
        let thread = Thread::new(
            config.name,
            config.priority,
            Arc::new(context),
            Some(stack),
            joiners,
            state.quantum,
        );
        log::debug!(
            "spawned thread {} '{}' at priority {}, {} byte stack",
            id.0,
            thread.name,
            config.priority,
            stack_size
        );
        state.threads.insert(id, thread);

        let [a, b, c, d] = id.to_le_bytes();
        state.record(records::thread::SPAWN, &[a, b, c, d, config.priority.0]);
        self.release(st);
        Ok(id)
    }

    /// First code every spawned thread runs on its own context.
    fn thread_main(&self, entry: ThreadEntry) {
        self.arch.irq_enable();
        self.after_switch();
        let code = entry();
        self.exit_current(code);
    }

    /// Terminates the running thread with `code`. Does not return on
    /// backends with real stacks.
    fn exit_current(&self, code: i32) {
        let mut st = self.lock();
        let state = &mut *st;
        let id = state.current;
        let thread = state.thread_mut(id);
        thread.state = ThreadState::Terminated;
        thread.retcode = Some(code);
        if !thread.owned_mutexes.is_empty() {
            log::warn!(
                "thread {} '{}' exited holding {} mutex(es)",
                id.0,
                thread.name,
                thread.owned_mutexes.len()
            );
        }
        log::debug!("thread {} '{}' exited with {}", id.0, thread.name, code);
        let detached = thread.flags.contains(ThreadFlags::DETACHED);
        let joiners = thread.joiners;

        if detached {
            state.reap.push(id);
        } else {
            state.unblock_all(joiners, WakeReason::Signaled);
        }

        let [a, b, c, d] = id.to_le_bytes();
        let [e, f, g, h] = code.to_le_bytes();
        state.record(records::thread::EXIT, &[a, b, c, d, e, f, g, h]);
        self.switch_away(st);
    }

    pub(crate) fn join_thread(&self, id: ThreadId, timeout: Timeout) -> KernelResult<i32> {
        let mut st = self.lock();
        if st.current == id {
            return Err(KernelError::Deadlock);
        }
        let Some(thread) = st.threads.get(&id) else {
            return Err(KernelError::InvalidArgs);
        };
        if thread.flags.contains(ThreadFlags::DETACHED) {
            return Err(KernelError::ThreadDetached);
        }

        if thread.state != ThreadState::Terminated {
            let joiners = thread.joiners;
            match self.block_on(st, Some(joiners), timeout) {
                WakeReason::Signaled => {}
                WakeReason::TimedOut => return Err(KernelError::TimedOut),
                WakeReason::Destroyed => return Err(KernelError::ThreadDetached),
            }
            st = self.lock();
        }

        let Some(thread) = st.threads.get(&id) else {
            return Err(KernelError::InvalidArgs);
        };
        if thread.flags.contains(ThreadFlags::DETACHED) {
            return Err(KernelError::ThreadDetached);
        }
        let Some(code) = thread.retcode else {
            invariant_violation(format_args!("joined thread {} has no exit code", id.0));
        };
        st.release_thread(id);
        let [a, b, c, d] = id.to_le_bytes();
        st.record(records::thread::JOIN, &[a, b, c, d]);
        log::debug!("joined thread {} (exit code {code})", id.0);
        self.release(st);
        Ok(code)
    }

    pub(crate) fn detach_thread(&self, id: ThreadId) -> KernelResult<()> {
        let mut st = self.lock();
        let state = &mut *st;
        let Some(thread) = state.threads.get_mut(&id) else {
            return Err(KernelError::InvalidArgs);
        };
        if thread.flags.contains(ThreadFlags::DETACHED) {
            return Ok(());
        }
        thread.flags |= ThreadFlags::DETACHED;
        let joiners = thread.joiners;
        let terminated = thread.state == ThreadState::Terminated;

        state.unblock_all(joiners, WakeReason::Destroyed);
        if terminated {
            state.release_thread(id);
        }
        let [a, b, c, d] = id.to_le_bytes();
        state.record(records::thread::DETACH, &[a, b, c, d]);
        log::debug!("detached thread {}", id.0);
        self.reschedule_locked(st);
        Ok(())
    }

    pub(crate) fn resume_thread(&self, id: ThreadId) -> KernelResult<()> {
        let mut st = self.lock();
        let Some(thread) = st.threads.get(&id) else {
            return Err(KernelError::InvalidArgs);
        };
        if thread.state != ThreadState::Suspended {
            return Err(KernelError::NotSuspended);
        }
        st.make_ready(id, false);
        self.reschedule_locked(st);
        Ok(())
    }

    pub(crate) fn thread_info(&self, id: ThreadId) -> Option<ThreadInfo> {
        let st = self.lock();
        st.threads.get(&id).map(|thread| thread.info(id))
    }

    /// Identifier of the running thread.
    pub fn current_thread(&self) -> ThreadId {
        self.lock().current
    }

    /// Ticks since boot.
    pub fn now(&self) -> u64 {
        self.lock().now
    }

    /// Blocks the running thread for `ticks` ticks (at least one).
    pub fn sleep(&self, ticks: u64) {
        let st = self.lock();
        let _ = self.block_on(st, None, Timeout::Ticks(ticks.max(1)));
    }

    /// Changes the running thread's base priority.
    ///
    /// Inherited priority still applies on top. Lowering the priority below a
    /// ready thread hands the processor over immediately.
    pub fn set_priority(&self, priority: Priority) -> KernelResult<()> {
        if !priority.is_valid() {
            return Err(KernelError::InvalidArgs);
        }
        let mut st = self.lock();
        let id = st.current;
        st.thread_mut(id).base_priority = priority;
        st.refresh_priority(id);
        self.reschedule_locked(st);
        Ok(())
    }

    /// Exempts the running thread from round-robin quantum expiry.
    pub fn set_real_time(&self) {
        let mut st = self.lock();
        let id = st.current;
        st.thread_mut(id).flags |= ThreadFlags::REAL_TIME;
        self.release(st);
    }

    /// Runs after every switch, on the thread that was switched to.
    pub(crate) fn after_switch(&self) {
        let mut st = self.lock();
        let state = &mut *st;
        for id in mem::take(&mut state.reap) {
            state.release_thread(id);
        }
        self.release(st);
    }

    pub fn stats(&self) -> KernelStats {
        self.lock().stats
    }

    /// Snapshot of every live thread, in id order.
    pub fn threads(&self) -> Vec<ThreadInfo> {
        let st = self.lock();
        st.threads
            .iter()
            .map(|(&id, thread)| thread.info(id))
            .collect()
    }

    /// Logs the thread table and scheduler counters.
    pub fn dump_threads(&self) {
        let threads = self.threads();
        let stats = self.stats();
        log::info!("kernel '{}': {} threads", self.config.name, threads.len());
        for info in &threads {
            log::info!(
                "  {:>3} {:<16} {:?} prio {}/{} quantum {} sched {} stack {}/{} flags {:?}",
                info.id.0,
                info.name,
                info.state,
                info.priority,
                info.base_priority,
                info.remaining_quantum,
                info.schedules,
                info.stack_high_water.unwrap_or(0),
                info.stack_size,
                info.flags
            );
        }
        {
            let st = self.lock();
            log::info!(
                "  ready {}, armed timers {}, stack bytes in use {}, deferred calls pending {}",
                st.ready.len(),
                st.timers.len(),
                st.stacks.in_use(),
                st.dpc.len()
            );
        }
        log::info!("  {stats:?}");
    }
}

impl<A: Arch> fmt::Debug for Kernel<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}
