//! Raw link transport: NIC-style packet queues.
//!
//! Transmission follows an explicit buffer lifecycle:
//! `alloc_packet` → fill `packet_content` → `submit_packet` → (link sends it
//! during `process_events`) → `get_acked_packet` → `release_packet`.
//! Buffers are a fixed pool; once every buffer is in flight, allocation fails
//! until `process_events` completes some of them.

pub mod arp;
pub mod framer;
pub mod memory;
pub mod packet_socket;

use remrom_core::wire::PACKET_BUFFER_SIZE;
use std::collections::VecDeque;

pub use memory::{MemoryLink, Wire};
pub use packet_socket::PacketSocketLink;

// ── Transport trait ──────────────────────────────────────────────────────────

pub trait LinkTransport {
    fn mac_address(&self) -> remrom_core::MacAddr;

    /// Reserve a transmit buffer of `len` bytes.
    fn alloc_packet(&mut self, len: usize) -> Result<PacketDescriptor, LinkError>;

    fn packet_content(&mut self, packet: &PacketDescriptor) -> &mut [u8];

    /// Whether the submit queue has room.
    fn ready_to_submit(&self) -> bool;

    fn submit_packet(&mut self, packet: PacketDescriptor) -> Result<(), LinkError>;

    /// Whether a completed packet is waiting to be collected.
    fn ack_avail(&self) -> bool;

    fn get_acked_packet(&mut self) -> Option<PacketDescriptor>;

    fn release_packet(&mut self, packet: PacketDescriptor);

    /// Move submitted packets onto the wire and complete them. Never blocks.
    fn process_events(&mut self) -> Result<(), LinkError>;

    /// Copy the next inbound frame into `buf`. `None` when nothing is pending.
    fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, LinkError>;
}

/// Handle to one transmit buffer. Not `Clone`: exactly one owner at a time.
#[derive(Debug, PartialEq, Eq)]
pub struct PacketDescriptor {
    slot: usize,
    len: usize,
}

impl PacketDescriptor {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shrink to the bytes actually written.
    pub fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("transmit buffers exhausted")]
    Exhausted,
    #[error("packet of {0} bytes exceeds buffer size {}", PACKET_BUFFER_SIZE)]
    TooLarge(usize),
    #[error("link I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

// ── Transmit pool ────────────────────────────────────────────────────────────

/// Fixed set of transmit buffers shared by the link implementations.
pub struct TxPool {
    buffers: Vec<Box<[u8]>>,
    free: Vec<usize>,
    submitted: VecDeque<PacketDescriptor>,
    acked: VecDeque<PacketDescriptor>,
}

impl TxPool {
    pub fn new(count: usize) -> Self {
        Self {
            buffers: (0..count)
                .map(|_| vec![0u8; PACKET_BUFFER_SIZE].into_boxed_slice())
                .collect(),
            free: (0..count).rev().collect(),
            submitted: VecDeque::with_capacity(count),
            acked: VecDeque::with_capacity(count),
        }
    }

    pub fn alloc(&mut self, len: usize) -> Result<PacketDescriptor, LinkError> {
        if len > PACKET_BUFFER_SIZE {
            return Err(LinkError::TooLarge(len));
        }
        let slot = self.free.pop().ok_or(LinkError::Exhausted)?;
        Ok(PacketDescriptor { slot, len })
    }

    pub fn content(&mut self, packet: &PacketDescriptor) -> &mut [u8] {
        &mut self.buffers[packet.slot][..packet.len]
    }

    pub fn frame(&self, packet: &PacketDescriptor) -> &[u8] {
        &self.buffers[packet.slot][..packet.len]
    }

    pub fn submit(&mut self, packet: PacketDescriptor) {
        self.submitted.push_back(packet);
    }

    /// Oldest submitted packet not yet on the wire.
    pub fn front_submitted(&self) -> Option<&[u8]> {
        self.submitted.front().map(|p| self.frame(p))
    }

    /// Mark the oldest submitted packet as sent.
    pub fn complete_front(&mut self) {
        if let Some(p) = self.submitted.pop_front() {
            self.acked.push_back(p);
        }
    }

    pub fn ack_avail(&self) -> bool {
        !self.acked.is_empty()
    }

    pub fn take_acked(&mut self) -> Option<PacketDescriptor> {
        self.acked.pop_front()
    }

    pub fn release(&mut self, packet: PacketDescriptor) {
        debug_assert!(!self.free.contains(&packet.slot));
        self.free.push(packet.slot);
    }

    pub fn in_flight(&self) -> usize {
        self.buffers.len() - self.free.len()
    }
}
