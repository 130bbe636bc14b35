use core::fmt;

/// Errors returned by kernel operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Stack or thread control block allocation failed.
    OutOfMemory,
    /// Mutex released by a thread that does not own it.
    NotOwner,
    /// Lock would never be granted (re-entrant lock or ownership cycle).
    Deadlock,
    /// Semaphore signaled past its configured maximum.
    Overflow,
    /// Bounded DPC queue, or a port buffer, has no free slot.
    QueueFull,
    /// Blocking call gave up before being satisfied.
    TimedOut,
    /// Argument outside the accepted range.
    InvalidArgs,
    /// Object was destroyed while the caller waited on it.
    Destroyed,
    /// Thread was detached and can no longer be joined.
    ThreadDetached,
    /// Thread is not in the suspended state.
    NotSuspended,
    /// A port with that name is already open for writing.
    AlreadyExists,
    /// The name belongs to a port that was closed but not yet destroyed.
    Busy,
    /// No port has that name.
    NotFound,
    /// A unicast port already has its reader.
    NotAllowed,
    /// A port group is at its member limit.
    TooBig,
    /// Port is closed, or not in the group the call expects.
    BadHandle,
    /// At least one reader's buffer had no room; the others got the packets.
    PartialWrite,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::NotOwner => write!(f, "caller does not own the mutex"),
            Self::Deadlock => write!(f, "lock would deadlock"),
            Self::Overflow => write!(f, "semaphore count overflow"),
            Self::QueueFull => write!(f, "queue is full"),
            Self::TimedOut => write!(f, "operation timed out"),
            Self::InvalidArgs => write!(f, "invalid arguments"),
            Self::Destroyed => write!(f, "object destroyed while waiting"),
            Self::ThreadDetached => write!(f, "thread is detached"),
            Self::NotSuspended => write!(f, "thread is not suspended"),
            Self::AlreadyExists => write!(f, "port name already in use"),
            Self::Busy => write!(f, "port is closed but not destroyed"),
            Self::NotFound => write!(f, "no port with that name"),
            Self::NotAllowed => write!(f, "unicast port already has a reader"),
            Self::TooBig => write!(f, "port group is full"),
            Self::BadHandle => write!(f, "port handle not usable for this call"),
            Self::PartialWrite => write!(f, "some readers had no room for the packets"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KernelError {}

/// Result type for kernel operations.
pub type KernelResult<T> = Result<T, KernelError>;

/// Why a blocked thread was made ready again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Released by a wake on its wait queue.
    Signaled,
    /// Its timeout expired first.
    TimedOut,
    /// The object it waited on was destroyed.
    Destroyed,
}

impl WakeReason {
    /// Maps the wake outcome to the result a blocking primitive returns.
    pub fn into_result(self) -> KernelResult<()> {
        match self {
            Self::Signaled => Ok(()),
            Self::TimedOut => Err(KernelError::TimedOut),
            Self::Destroyed => Err(KernelError::Destroyed),
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            Self::Signaled => 0,
            Self::TimedOut => 1,
            Self::Destroyed => 2,
        }
    }
}
