//! Named message ports: fixed-size packets from one writer to its readers.
//!
//! A [`WritePort`] is registered under a name and readers attach to it with
//! [`ReadPort::open`]. A unicast port accepts a single reader; a broadcast
//! port copies every packet into each reader's own buffer. Packets written
//! before anyone attaches are kept and handed to the first reader, along
//! with the writer's buffer. A [`PortGroup`] lets one thread wait on several
//! read ports at once.
//!
//! Writes never block and may be issued from interrupt context. Reads block
//! on the read port's (or the group's) wait queue.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use bitflags::bitflags;

use crate::arch::Arch;
use crate::error::{KernelError, KernelResult, WakeReason};
use crate::kernel::State;
use crate::sync::Arc;
use crate::timer::Timeout;
use crate::wait_queue::{WaitQueueId, WaitQueueState};
use crate::Kernel;

/// Port names must be shorter than this many bytes.
pub const PORT_NAME_LEN: usize = 12;
/// Size of one packet.
pub const PORT_PACKET_LEN: usize = 16;
/// Most read ports a single group may hold.
pub const MAX_PORT_GROUP_COUNT: usize = 256;

const SMALL_BUFFER: usize = 8;
const BIG_BUFFER: usize = 64;

pub type Packet = [u8; PORT_PACKET_LEN];

bitflags! {
    /// Options for [`WritePort::create`]. The empty set is a broadcast port
    /// with a small buffer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct PortMode: u32 {
        /// At most one reader may attach.
        const UNICAST = 1 << 0;
        /// Buffer 64 packets instead of 8. Unicast ports only.
        const BIG_BUFFER = 1 << 1;
    }
}

/// A packet as delivered to a reader, tagged with the context value the
/// read port was opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMessage {
    pub packet: Packet,
    pub context: usize,
}

struct PacketRing {
    packets: VecDeque<Packet>,
    capacity: usize,
}

impl PacketRing {
    fn new(capacity: usize) -> Self {
        Self {
            packets: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends all of `packets` or none of them.
    fn push_all(&mut self, packets: &[Packet]) -> KernelResult<()> {
        if self.capacity - self.packets.len() < packets.len() {
            return Err(KernelError::QueueFull);
        }
        self.packets.extend(packets.iter().copied());
        Ok(())
    }
}

pub(crate) struct WritePortState {
    name: String,
    mode: PortMode,
    /// Holds written packets while no reader is attached.
    buffer: Option<PacketRing>,
    readers: Vec<usize>,
    closed: bool,
}

pub(crate) struct ReadPortState {
    /// `None` once the writer has been destroyed.
    writer: Option<usize>,
    buffer: PacketRing,
    context: usize,
    queue: WaitQueueId,
    group: Option<usize>,
}

pub(crate) struct PortGroupState {
    queue: WaitQueueId,
    members: Vec<usize>,
}

impl<C> State<C> {
    fn create_write_port(&mut self, name: &str, mode: PortMode) -> KernelResult<usize> {
        if let Some((_, port)) = self.write_ports.iter().find(|(_, port)| port.name == name) {
            return Err(if port.closed {
                KernelError::Busy
            } else {
                KernelError::AlreadyExists
            });
        }
        let capacity = if mode.contains(PortMode::BIG_BUFFER) {
            BIG_BUFFER
        } else {
            SMALL_BUFFER
        };
        Ok(self.write_ports.insert(WritePortState {
            name: String::from(name),
            mode,
            buffer: Some(PacketRing::new(capacity)),
            readers: Vec::new(),
            closed: false,
        }))
    }

    fn open_read_port(&mut self, name: &str, context: usize) -> KernelResult<usize> {
        let writer = self
            .write_ports
            .iter()
            .find(|(_, port)| port.name == name)
            .map(|(writer, _)| writer)
            .ok_or(KernelError::NotFound)?;

        let port = &mut self.write_ports[writer];
        let buffer = match port.buffer.take() {
            Some(buffer) => buffer,
            None if port.mode.contains(PortMode::UNICAST) => return Err(KernelError::NotAllowed),
            None => PacketRing::new(SMALL_BUFFER),
        };
        let queue = WaitQueueId(self.wait_queues.insert(WaitQueueState::new()));
        let reader = self.read_ports.insert(ReadPortState {
            writer: Some(writer),
            buffer,
            context,
            queue,
            group: None,
        });
        self.write_ports[writer].readers.push(reader);
        Ok(reader)
    }

    /// Copies `packets` to every reader and wakes one waiter per reader,
    /// preferring a thread blocked on the reader's group.
    fn write_packets(&mut self, writer: usize, packets: &[Packet]) -> KernelResult<()> {
        let port = &mut self.write_ports[writer];
        if port.closed {
            return Err(KernelError::BadHandle);
        }
        if let Some(buffer) = &mut port.buffer {
            return buffer.push_all(packets);
        }

        let mut result = Ok(());
        for index in 0..self.write_ports[writer].readers.len() {
            let reader = self.write_ports[writer].readers[index];
            let port = &mut self.read_ports[reader];
            if port.buffer.push_all(packets).is_err() {
                result = Err(KernelError::PartialWrite);
                continue;
            }
            let (queue, group) = (port.queue, port.group);
            let group_queue = group.map(|group| self.port_groups[group].queue);
            let group_woke = group_queue
                .is_some_and(|queue| self.unblock_one(queue, WakeReason::Signaled).is_some());
            if !group_woke {
                self.unblock_one(queue, WakeReason::Signaled);
            }
        }
        result
    }

    /// Unregisters the writer and fails every pending read on its readers.
    fn destroy_write_port(&mut self, writer: usize) -> usize {
        let Some(port) = self.write_ports.try_remove(writer) else {
            return 0;
        };
        let mut woken = 0;
        for reader in port.readers {
            let port = &mut self.read_ports[reader];
            port.writer = None;
            let (queue, group) = (port.queue, port.group);
            woken += self.unblock_all(queue, WakeReason::Destroyed);
            if let Some(group) = group {
                let queue = self.port_groups[group].queue;
                woken += self.unblock_all(queue, WakeReason::Destroyed);
            }
        }
        woken
    }

    /// Detaches a reader. The last reader hands its buffer back to the
    /// writer. Returns the wait queue left to destroy.
    fn close_read_port(&mut self, reader: usize) -> Option<WaitQueueId> {
        let port = self.read_ports.try_remove(reader)?;
        if let Some(writer) = port.writer {
            let writer = &mut self.write_ports[writer];
            writer.readers.retain(|&id| id != reader);
            if writer.readers.is_empty() {
                writer.buffer = Some(port.buffer);
            }
        }
        if let Some(group) = port.group {
            self.port_groups[group].members.retain(|&id| id != reader);
        }
        Some(port.queue)
    }

    fn create_port_group(&mut self, members: &[usize]) -> KernelResult<usize> {
        if members.len() > MAX_PORT_GROUP_COUNT {
            return Err(KernelError::TooBig);
        }
        for (index, &member) in members.iter().enumerate() {
            if self.read_ports[member].group.is_some() || members[..index].contains(&member) {
                return Err(KernelError::BadHandle);
            }
        }
        let queue = WaitQueueId(self.wait_queues.insert(WaitQueueState::new()));
        let group = self.port_groups.insert(PortGroupState {
            queue,
            members: members.to_vec(),
        });
        for &member in members {
            self.read_ports[member].group = Some(group);
        }
        Ok(group)
    }

    fn add_to_group(&mut self, group: usize, member: usize) -> KernelResult<()> {
        if self.read_ports[member].group.is_some() {
            return Err(KernelError::BadHandle);
        }
        let state = &mut self.port_groups[group];
        if state.members.len() == MAX_PORT_GROUP_COUNT {
            return Err(KernelError::TooBig);
        }
        state.members.push(member);
        let queue = state.queue;

        let port = &mut self.read_ports[member];
        port.group = Some(group);
        if !port.buffer.packets.is_empty() {
            self.unblock_one(queue, WakeReason::Signaled);
        }
        Ok(())
    }

    fn remove_from_group(&mut self, group: usize, member: usize) -> KernelResult<()> {
        let port = &mut self.read_ports[member];
        if port.group != Some(group) {
            return Err(KernelError::BadHandle);
        }
        port.group = None;
        self.port_groups[group].members.retain(|&id| id != member);
        Ok(())
    }

    fn destroy_port_group(&mut self, group: usize) -> Option<WaitQueueId> {
        let state = self.port_groups.try_remove(group)?;
        for member in state.members {
            self.read_ports[member].group = None;
        }
        Some(state.queue)
    }

    fn take_packet(&mut self, reader: usize) -> Option<PortMessage> {
        let port = &mut self.read_ports[reader];
        let packet = port.buffer.packets.pop_front()?;
        Some(PortMessage {
            packet,
            context: port.context,
        })
    }
}

/// What is left of `timeout` once `now - start` ticks have passed.
fn remaining(timeout: Timeout, start: u64, now: u64) -> Timeout {
    match timeout {
        Timeout::Ticks(ticks) => Timeout::Ticks(ticks.saturating_sub(now - start)),
        other => other,
    }
}

impl<A: Arch> Kernel<A> {
    fn port_read(&self, reader: usize, timeout: Timeout) -> KernelResult<PortMessage> {
        let mut st = self.lock();
        let start = st.now;
        loop {
            let message = st.take_packet(reader);
            if let Some(message) = message {
                self.release(st);
                return Ok(message);
            }
            let port = &st.read_ports[reader];
            if port.writer.is_none() {
                self.release(st);
                return Err(KernelError::Destroyed);
            }
            let queue = port.queue;
            let timeout = remaining(timeout, start, st.now);
            self.block_on(st, Some(queue), timeout).into_result()?;
            st = self.lock();
        }
    }

    fn port_group_read(&self, group: usize, timeout: Timeout) -> KernelResult<PortMessage> {
        let mut st = self.lock();
        let start = st.now;
        loop {
            let state = &mut *st;
            let message = state.port_groups[group]
                .members
                .iter()
                .find_map(|&member| {
                    let port = &mut state.read_ports[member];
                    let packet = port.buffer.packets.pop_front()?;
                    Some(PortMessage {
                        packet,
                        context: port.context,
                    })
                });
            if let Some(message) = message {
                self.release(st);
                return Ok(message);
            }
            let queue = st.port_groups[group].queue;
            let timeout = remaining(timeout, start, st.now);
            self.block_on(st, Some(queue), timeout).into_result()?;
            st = self.lock();
        }
    }
}

/// Writing end of a named port. Dropping it destroys the port: pending
/// reads on its readers fail with [`KernelError::Destroyed`].
pub struct WritePort<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: usize,
}

impl<A: Arch> WritePort<A> {
    /// Registers a port under `name`.
    ///
    /// Fails with [`KernelError::AlreadyExists`] if a port of that name is
    /// open, or [`KernelError::Busy`] if it is closed but still alive.
    pub fn create(kernel: &Arc<Kernel<A>>, name: &str, mode: PortMode) -> KernelResult<Self> {
        if name.is_empty() || name.len() >= PORT_NAME_LEN {
            return Err(KernelError::InvalidArgs);
        }
        if mode.contains(PortMode::BIG_BUFFER) && !mode.contains(PortMode::UNICAST) {
            return Err(KernelError::InvalidArgs);
        }
        let id = kernel.lock().create_write_port(name, mode)?;
        log::debug!("port {name:?} created ({mode:?})");
        Ok(Self {
            kernel: Arc::clone(kernel),
            id,
        })
    }

    /// Delivers `packets` to every reader, all of them or none per reader.
    ///
    /// With no reader attached the packets are buffered, failing with
    /// [`KernelError::QueueFull`] if they do not fit. A reader without room
    /// is skipped and the call returns [`KernelError::PartialWrite`].
    /// Interrupt-safe.
    pub fn write(&self, packets: &[Packet]) -> KernelResult<()> {
        let mut st = self.kernel.lock();
        let result = st.write_packets(self.id, packets);
        self.kernel.reschedule_locked(st);
        result
    }

    /// Refuses further writes. Readers keep draining what was written and
    /// the name stays taken until the port is dropped.
    pub fn close(&self) {
        self.kernel.lock().write_ports[self.id].closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.kernel.lock().write_ports[self.id].closed
    }

    /// Number of attached readers.
    pub fn readers(&self) -> usize {
        self.kernel.lock().write_ports[self.id].readers.len()
    }
}

impl<A: Arch> fmt::Debug for WritePort<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WritePort").field("id", &self.id).finish()
    }
}

impl<A: Arch> Drop for WritePort<A> {
    fn drop(&mut self) {
        let mut st = self.kernel.lock();
        let woken = st.destroy_write_port(self.id);
        if woken > 0 {
            log::debug!("port {} destroyed with {woken} reader(s) waiting", self.id);
        }
        self.kernel.reschedule_locked(st);
    }
}

/// Reading end of a named port. Dropping it detaches from the writer and
/// wakes its own waiters with [`KernelError::Destroyed`].
pub struct ReadPort<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: usize,
}

impl<A: Arch> ReadPort<A> {
    /// Attaches to the port registered as `name`. Every packet read through
    /// this handle carries `context`.
    pub fn open(kernel: &Arc<Kernel<A>>, name: &str, context: usize) -> KernelResult<Self> {
        let id = kernel.lock().open_read_port(name, context)?;
        Ok(Self {
            kernel: Arc::clone(kernel),
            id,
        })
    }

    /// Takes the oldest packet, blocking while none is buffered.
    ///
    /// Fails with [`KernelError::Destroyed`] once the writer is gone and the
    /// buffer is drained.
    pub fn read(&self, timeout: Timeout) -> KernelResult<PortMessage> {
        self.kernel.port_read(self.id, timeout)
    }

    /// Takes a packet only if one is buffered right now. Interrupt-safe.
    pub fn try_read(&self) -> KernelResult<PortMessage> {
        self.read(Timeout::Poll)
    }

    /// Packets buffered and not yet read.
    pub fn pending(&self) -> usize {
        self.kernel.lock().read_ports[self.id].buffer.packets.len()
    }
}

impl<A: Arch> fmt::Debug for ReadPort<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadPort").field("id", &self.id).finish()
    }
}

impl<A: Arch> Drop for ReadPort<A> {
    fn drop(&mut self) {
        let queue = self.kernel.lock().close_read_port(self.id);
        if let Some(queue) = queue {
            self.kernel.destroy_wait_queue(queue);
        }
    }
}

/// A set of read ports read as one.
///
/// [`read`](Self::read) returns the first buffered packet, scanning members
/// in the order they joined. A port belongs to at most one group.
pub struct PortGroup<A: Arch> {
    kernel: Arc<Kernel<A>>,
    id: usize,
}

impl<A: Arch> PortGroup<A> {
    /// Groups `ports`. Fails with [`KernelError::BadHandle`] if one of them
    /// is already grouped, or [`KernelError::TooBig`] past
    /// [`MAX_PORT_GROUP_COUNT`] members.
    pub fn new(kernel: &Arc<Kernel<A>>, ports: &[&ReadPort<A>]) -> KernelResult<Self> {
        let members: Vec<usize> = ports.iter().map(|port| port.id).collect();
        let id = kernel.lock().create_port_group(&members)?;
        Ok(Self {
            kernel: Arc::clone(kernel),
            id,
        })
    }

    /// Adds `port`, waking a group reader if it already holds packets.
    pub fn add(&self, port: &ReadPort<A>) -> KernelResult<()> {
        let mut st = self.kernel.lock();
        let result = st.add_to_group(self.id, port.id);
        self.kernel.reschedule_locked(st);
        result
    }

    pub fn remove(&self, port: &ReadPort<A>) -> KernelResult<()> {
        self.kernel.lock().remove_from_group(self.id, port.id)
    }

    /// Takes the first packet buffered on any member, blocking while all
    /// of them are empty.
    pub fn read(&self, timeout: Timeout) -> KernelResult<PortMessage> {
        self.kernel.port_group_read(self.id, timeout)
    }

    pub fn len(&self) -> usize {
        self.kernel.lock().port_groups[self.id].members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<A: Arch> fmt::Debug for PortGroup<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortGroup").field("id", &self.id).finish()
    }
}

impl<A: Arch> Drop for PortGroup<A> {
    fn drop(&mut self) {
        let queue = self.kernel.lock().destroy_port_group(self.id);
        if let Some(queue) = queue {
            self.kernel.destroy_wait_queue(queue);
        }
    }
}
