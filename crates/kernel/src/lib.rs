//! # lk-kernel - Portable Preemptive Kernel Core
//!
//! A small real-time kernel core: a preemptive priority scheduler, the
//! blocking primitives built on it, and a deferred procedure call queue,
//! all driven through a narrow architecture backend.
//!
//! ## Architecture
//!
//! **Threads**: 32 priority levels, strict priority dispatch with
//! round-robin time slicing inside a level. Threads block on wait queues,
//! sleep, join one another and are preempted at interrupt exit.
//!
//! **Primitives**: semaphores, mutexes with priority inheritance, manual and
//! auto reset events, and a bare condition-style wait queue. Named message
//! ports carry fixed-size packets from a writer to one or many readers. Every
//! blocking call takes a [`Timeout`].
//!
//! **Interrupts**: a timer source calls [`Kernel::timer_interrupt`] once per
//! tick; other interrupt handlers bracket themselves with
//! [`Kernel::irq_enter`] and [`Kernel::irq_exit`] and push longer work to the
//! DPC worker with [`Kernel::dpc_queue`].
//!
//! **Backends**: [`arch::Arch`] is the only architecture-specific surface.
//! The `hosted` feature provides [`arch::Hosted`], which runs every kernel
//! thread on a host OS thread with exactly one of them executing at a time.
//!
//! ## Module Overview
//!
//! - [`arch`] - Context backend contract and the hosted backend
//! - [`thread`] - Thread identity, priorities, handles and snapshots
//! - [`primitives`] - Semaphore, mutex, event and message ports
//! - [`wait_queue`] - Condition-style wait object
//! - [`timer`] - Timeouts and software timers
//! - [`dpc`] - Deferred procedure call queue
//! - [`config`] - Kernel configuration with builder pattern
//! - [`trace`] - Binary event trace hook and record identifiers

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod dpc;
pub mod error;
mod kernel;
pub mod primitives;
mod runqueue;
mod scheduler;
pub mod stack;
mod sync;
pub mod thread;
pub mod timer;
pub mod trace;
pub mod wait_queue;

#[cfg(all(test, feature = "hosted"))]
mod tests;

pub use config::{KernelConfig, KernelConfigBuilder};
pub use dpc::{DpcCallback, DpcFlags};
pub use error::{KernelError, KernelResult, WakeReason};
pub use kernel::{Kernel, KernelBuilder, KernelStats};
pub use primitives::{
    Event, Mutex, Packet, PortGroup, PortMessage, PortMode, ReadPort, ResetMode, Semaphore,
    WritePort,
};
pub use scheduler::MAX_INHERITANCE_DEPTH;
pub use thread::{Priority, ThreadConfig, ThreadFlags, ThreadHandle, ThreadId, ThreadInfo, ThreadState};
pub use timer::{Timeout, Timer};
pub use trace::{TraceError, TraceHook};
pub use wait_queue::WaitQueue;

#[cfg(feature = "hosted")]
pub use arch::Hosted;
