//! Canonical kernel event record identifiers shared across the workspace.

/// Thread lifecycle record identifiers.
pub mod thread {
    /// Thread created (`[id: u32 le, priority]`).
    pub const SPAWN: u8 = 1;
    /// Thread reached its terminal return (`[id: u32 le, code: i32 le]`).
    pub const EXIT: u8 = 2;
    /// Thread joined and released (`[id: u32 le]`).
    pub const JOIN: u8 = 3;
    /// Thread detached (`[id: u32 le]`).
    pub const DETACH: u8 = 4;
    /// Effective priority changed (`[id: u32 le, old, new]`).
    pub const PRIORITY: u8 = 5;
}

/// Scheduler record identifiers.
pub mod sched {
    /// Context switch (`[new: u32 le, old: u32 le]`).
    pub const SWITCH: u8 = 50;
    /// Running thread blocked (`[id: u32 le]`).
    pub const BLOCK: u8 = 51;
    /// Thread woken from a wait queue (`[id: u32 le, reason]`).
    pub const WAKE: u8 = 52;
    /// Running thread preempted at interrupt exit (`[id: u32 le]`).
    pub const PREEMPT: u8 = 53;
    /// Idle thread dispatched (`[old: u32 le]`).
    pub const IDLE: u8 = 54;
}

/// Timer record identifiers.
pub mod timer {
    /// Wait timed out (`[id: u32 le]`).
    pub const TIMEOUT: u8 = 32;
    /// Tick processed with expirations (`[expired]`).
    pub const TICK: u8 = 33;
}

/// Deferred procedure call record identifiers.
pub mod dpc {
    /// Entry enqueued (`[depth: u16 le]`).
    pub const QUEUE: u8 = 70;
    /// Entry executed by the worker.
    pub const RUN: u8 = 71;
    /// Entry rejected because the queue is full.
    pub const FULL: u8 = 72;
}
