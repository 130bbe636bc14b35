//! Threads: identity, priority, lifecycle state and the control block the
//! scheduler keeps for each of them.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult, WakeReason};
use crate::primitives::MutexId;
use crate::stack::Stack;
use crate::sync::Arc;
use crate::timer::{Timeout, TimerKey};
use crate::wait_queue::WaitQueueId;
use crate::Kernel;

/// Number of distinct priority levels.
pub const NUM_PRIORITIES: usize = 32;

/// Thread priority. Higher values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    pub const IDLE: Priority = Priority(0);
    pub const LOWEST: Priority = Priority(0);
    pub const LOW: Priority = Priority(8);
    pub const DEFAULT: Priority = Priority(16);
    pub const HIGH: Priority = Priority(24);
    /// Priority of the deferred procedure call worker.
    pub const DPC: Priority = Priority(30);
    pub const HIGHEST: Priority = Priority(NUM_PRIORITIES as u8 - 1);

    /// Validates a raw priority level.
    pub fn new(level: u8) -> KernelResult<Self> {
        if (level as usize) < NUM_PRIORITIES {
            Ok(Self(level))
        } else {
            Err(KernelError::InvalidArgs)
        }
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn is_valid(self) -> bool {
        self.index() < NUM_PRIORITIES
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread identifier. Never reused within one kernel instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u32);

impl ThreadId {
    pub(crate) fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

/// Thread lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Created but never made runnable.
    New,
    /// Created suspended, waiting for [`ThreadHandle::resume`].
    Suspended,
    /// In the ready queue.
    Ready,
    /// Executing. Exactly one thread is in this state.
    Running,
    /// Waiting on a wait queue, a timeout, or both.
    Blocked,
    /// Returned from its entry; waiting to be joined or reaped.
    Terminated,
}

bitflags! {
    /// Per-thread scheduling flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ThreadFlags: u8 {
        /// Resources are released as soon as the thread terminates.
        const DETACHED = 1 << 0;
        /// Exempt from quantum expiry; only higher priority preempts it.
        const REAL_TIME = 1 << 1;
        /// The per-kernel idle thread.
        const IDLE = 1 << 2;
    }
}

/// Entry point of a kernel thread. The return value is its exit code.
pub type ThreadEntry = Box<dyn FnOnce() -> i32 + Send + 'static>;

/// Parameters for spawning a thread.
#[derive(Debug, Clone)]
pub struct ThreadConfig {
    pub name: String,
    pub priority: Priority,
    /// Stack size in bytes. `None` uses the kernel's default stack size.
    pub stack_size: Option<usize>,
}

impl ThreadConfig {
    /// Creates a configuration with the kernel's default stack size.
    pub fn new(name: impl Into<String>, priority: Priority) -> Self {
        Self {
            name: name.into(),
            priority,
            stack_size: None,
        }
    }

    /// Sets the stack size for the thread.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }
}

/// Scheduler control block for one thread.
pub(crate) struct Thread<C> {
    pub name: String,
    pub base_priority: Priority,
    /// Base priority raised by inheritance, if any.
    pub priority: Priority,
    pub state: ThreadState,
    pub flags: ThreadFlags,
    pub remaining_quantum: u32,
    pub context: Arc<C>,
    pub stack: Option<Stack>,
    pub blocked_on: Option<WaitQueueId>,
    pub wake_reason: Option<WakeReason>,
    pub timeout: Option<TimerKey>,
    pub owned_mutexes: Vec<MutexId>,
    /// Threads blocked in join.
    pub joiners: WaitQueueId,
    pub retcode: Option<i32>,
    pub schedules: u64,
}

impl<C> Thread<C> {
    pub fn new(
        name: String,
        priority: Priority,
        context: Arc<C>,
        stack: Option<Stack>,
        joiners: WaitQueueId,
        quantum: u32,
    ) -> Self {
        Self {
            name,
            base_priority: priority,
            priority,
            state: ThreadState::New,
            flags: ThreadFlags::empty(),
            remaining_quantum: quantum,
            context,
            stack,
            blocked_on: None,
            wake_reason: None,
            timeout: None,
            owned_mutexes: Vec::new(),
            joiners,
            retcode: None,
            schedules: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.flags.contains(ThreadFlags::IDLE)
    }

    pub fn info(&self, id: ThreadId) -> ThreadInfo {
        ThreadInfo {
            id,
            name: self.name.clone(),
            state: self.state,
            base_priority: self.base_priority,
            priority: self.priority,
            remaining_quantum: self.remaining_quantum,
            flags: self.flags,
            schedules: self.schedules,
            stack_size: self.stack.as_ref().map_or(0, Stack::len),
            stack_high_water: self.stack.as_ref().map(Stack::high_water),
        }
    }
}

/// Point-in-time snapshot of a thread, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
    pub state: ThreadState,
    pub base_priority: Priority,
    /// Effective priority, including inheritance.
    pub priority: Priority,
    pub remaining_quantum: u32,
    pub flags: ThreadFlags,
    /// Times the thread has been dispatched.
    pub schedules: u64,
    pub stack_size: usize,
    /// Deepest stack usage observed. `None` for the bootstrap thread, which
    /// runs on a stack the kernel does not own.
    pub stack_high_water: Option<usize>,
}

/// Owning reference to a spawned thread.
///
/// Dropping the handle without joining detaches the thread.
pub struct ThreadHandle<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: ThreadId,
}

impl<A: Arch> ThreadHandle<A> {
    pub(crate) fn new(kernel: Arc<Kernel<A>>, id: ThreadId) -> Self {
        Self { kernel, id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Waits for the thread to terminate and returns its exit code.
    ///
    /// A successful join releases the thread's resources.
    pub fn join(&self, timeout: Timeout) -> KernelResult<i32> {
        self.kernel.join_thread(self.id, timeout)
    }

    /// Lets the thread release its own resources when it terminates.
    ///
    /// Any thread currently blocked in [`join`](Self::join) fails with
    /// [`KernelError::ThreadDetached`].
    pub fn detach(&self) -> KernelResult<()> {
        self.kernel.detach_thread(self.id)
    }

    /// Makes a thread spawned suspended runnable.
    pub fn resume(&self) -> KernelResult<()> {
        self.kernel.resume_thread(self.id)
    }

    /// Snapshot of the thread, or `None` once it has been released.
    pub fn info(&self) -> Option<ThreadInfo> {
        self.kernel.thread_info(self.id)
    }
}

impl<A: Arch> fmt::Debug for ThreadHandle<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle").field("id", &self.id).finish()
    }
}

impl<A: Arch> Drop for ThreadHandle<A> {
    fn drop(&mut self) {
        let _ = self.kernel.detach_thread(self.id);
    }
}
