//! In-process link. Frames move only inside `process_events`, so transmit
//! back-pressure behaves as it does on a real NIC.

use remrom_core::MacAddr;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{LinkError, LinkTransport, PacketDescriptor, TxPool};

/// One direction of an in-memory cable. Clones share the queue.
#[derive(Clone, Default)]
pub struct Wire {
    frames: Rc<RefCell<VecDeque<Vec<u8>>>>,
}

impl Wire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, frame: Vec<u8>) {
        self.frames.borrow_mut().push_back(frame);
    }

    pub fn pop(&self) -> Option<Vec<u8>> {
        self.frames.borrow_mut().pop_front()
    }

    pub fn len(&self) -> usize {
        self.frames.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.borrow().is_empty()
    }

    pub fn drain(&self) -> Vec<Vec<u8>> {
        self.frames.borrow_mut().drain(..).collect()
    }
}

pub struct MemoryLink {
    mac: MacAddr,
    pool: TxPool,
    tx: Wire,
    rx: Wire,
    /// Submitted packets completed per `process_events` call. None = all.
    batch: Option<usize>,
}

impl MemoryLink {
    /// Link whose outbound and inbound wires are held by the caller.
    pub fn new(mac: MacAddr, queue_size: usize, tx: Wire, rx: Wire) -> Self {
        Self {
            mac,
            pool: TxPool::new(queue_size),
            tx,
            rx,
            batch: None,
        }
    }

    /// Two links connected back to back.
    pub fn pair(a: MacAddr, b: MacAddr, queue_size: usize) -> (MemoryLink, MemoryLink) {
        let a_to_b = Wire::new();
        let b_to_a = Wire::new();
        (
            MemoryLink::new(a, queue_size, a_to_b.clone(), b_to_a.clone()),
            MemoryLink::new(b, queue_size, b_to_a, a_to_b),
        )
    }

    /// Complete at most `batch` packets per `process_events` call. A batch
    /// of 0 stalls the link: nothing is sent until the batch is raised.
    pub fn with_batch(mut self, batch: usize) -> Self {
        self.set_batch(Some(batch));
        self
    }

    pub fn set_batch(&mut self, batch: Option<usize>) {
        self.batch = batch;
    }

    pub fn in_flight(&self) -> usize {
        self.pool.in_flight()
    }
}

impl LinkTransport for MemoryLink {
    fn mac_address(&self) -> MacAddr {
        self.mac
    }

    fn alloc_packet(&mut self, len: usize) -> Result<PacketDescriptor, LinkError> {
        self.pool.alloc(len)
    }

    fn packet_content(&mut self, packet: &PacketDescriptor) -> &mut [u8] {
        self.pool.content(packet)
    }

    fn ready_to_submit(&self) -> bool {
        true
    }

    fn submit_packet(&mut self, packet: PacketDescriptor) -> Result<(), LinkError> {
        self.pool.submit(packet);
        Ok(())
    }

    fn ack_avail(&self) -> bool {
        self.pool.ack_avail()
    }

    fn get_acked_packet(&mut self) -> Option<PacketDescriptor> {
        self.pool.take_acked()
    }

    fn release_packet(&mut self, packet: PacketDescriptor) {
        self.pool.release(packet);
    }

    fn process_events(&mut self) -> Result<(), LinkError> {
        let mut done = 0;
        while let Some(frame) = self.pool.front_submitted() {
            if self.batch.is_some_and(|batch| done == batch) {
                break;
            }
            self.tx.push(frame.to_vec());
            self.pool.complete_front();
            done += 1;
        }
        Ok(())
    }

    fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, LinkError> {
        let Some(frame) = self.rx.pop() else {
            return Ok(None);
        };
        let len = frame.len().min(buf.len());
        buf[..len].copy_from_slice(&frame[..len]);
        Ok(Some(len))
    }
}
