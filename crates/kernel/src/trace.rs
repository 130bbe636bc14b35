#[cfg(feature = "kevlog")]
pub use lk_kevlog::{records, TraceError, TraceHook};

#[cfg(feature = "kevlog")]
pub type TraceResult = Result<(), TraceError>;

#[cfg(not(feature = "kevlog"))]
use crate::sync::Arc;

#[cfg(not(feature = "kevlog"))]
pub type TraceError = core::convert::Infallible;

#[cfg(not(feature = "kevlog"))]
pub type TraceResult = Result<(), TraceError>;

#[cfg(not(feature = "kevlog"))]
pub type TraceHook = Arc<dyn Fn(u8, &[u8], bool) -> TraceResult + Send + Sync>;

#[cfg(not(feature = "kevlog"))]
pub mod records {
    pub mod thread {
        pub const SPAWN: u8 = 1;
        pub const EXIT: u8 = 2;
        pub const JOIN: u8 = 3;
        pub const DETACH: u8 = 4;
        pub const PRIORITY: u8 = 5;
    }

    pub mod sched {
        pub const SWITCH: u8 = 50;
        pub const BLOCK: u8 = 51;
        pub const WAKE: u8 = 52;
        pub const PREEMPT: u8 = 53;
        pub const IDLE: u8 = 54;
    }

    pub mod timer {
        pub const TIMEOUT: u8 = 32;
        pub const TICK: u8 = 33;
    }

    pub mod dpc {
        pub const QUEUE: u8 = 70;
        pub const RUN: u8 = 71;
        pub const FULL: u8 = 72;
    }
}

/// A trace record captured under the kernel lock and emitted after it is released.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PendingRecord {
    pub record: u8,
    pub len: u8,
    pub payload: [u8; 8],
}

impl PendingRecord {
    pub fn new(record: u8, fields: &[u8]) -> Self {
        let mut payload = [0u8; 8];
        let len = fields.len().min(payload.len());
        payload[..len].copy_from_slice(&fields[..len]);
        Self {
            record,
            len: len as u8,
            payload,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }
}
