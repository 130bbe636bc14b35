//! Blocking synchronization primitives and message ports.
//!
//! Each primitive is a handle onto state kept under the kernel lock, plus a
//! wait queue for the threads blocked on it. Release operations are
//! reschedule points: a strictly higher-priority waiter takes over at once in
//! thread context, or at interrupt exit when released from an interrupt.
//! Dropping a handle destroys the object; its waiters fail with
//! [`KernelError::Destroyed`](crate::KernelError::Destroyed).

mod event;
mod mutex;
mod port;
mod semaphore;

pub use event::{Event, ResetMode};
pub use mutex::Mutex;
pub use port::{
    Packet, PortGroup, PortMessage, PortMode, ReadPort, WritePort, MAX_PORT_GROUP_COUNT,
    PORT_NAME_LEN, PORT_PACKET_LEN,
};
pub use semaphore::Semaphore;

pub(crate) use event::EventState;
pub(crate) use mutex::{MutexId, MutexState};
pub(crate) use port::{PortGroupState, ReadPortState, WritePortState};
pub(crate) use semaphore::SemaphoreState;
