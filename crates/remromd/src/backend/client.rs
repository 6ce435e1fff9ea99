//! Consumer backend: requests content on SIGNAL and feeds DATA fragments to
//! the registered receivers.

use remrom_core::config::DEFAULT_MAX_CONTENT_SIZE;
use remrom_core::packet::{encode_control, DataFragment, Message, MessageBody};
use remrom_core::wire::{PacketHeader, PacketType};
use remrom_core::{ContentHash, ModuleName};
use remrom_services::{BackendClient, CommitOutcome, Receiver};
use std::collections::HashMap;
use std::mem::size_of;

use super::{drain_link, rx_buffer};
use crate::link::framer::{FrameError, Framer};
use crate::link::{LinkError, LinkTransport};

type Registry = HashMap<ModuleName, Box<dyn Receiver>>;

pub struct RomClient<L> {
    framer: Framer<L>,
    receivers: Registry,
    rx_buf: Vec<u8>,
    max_content_size: u32,
}

impl<L: LinkTransport> RomClient<L> {
    pub fn new(framer: Framer<L>) -> Self {
        Self {
            framer,
            receivers: HashMap::new(),
            rx_buf: rx_buffer(),
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
        }
    }

    /// Drop DATA announcing content larger than `limit` bytes.
    pub fn with_max_content_size(mut self, limit: u32) -> Self {
        self.max_content_size = limit;
        self
    }

    pub fn framer(&self) -> &Framer<L> {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut Framer<L> {
        &mut self.framer
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleName> {
        self.receivers.keys()
    }

    /// Handle every frame waiting on the link.
    pub fn poll_link(&mut self) -> Result<usize, LinkError> {
        let Self {
            framer,
            receivers,
            rx_buf,
            max_content_size,
        } = self;
        let limit = *max_content_size;
        drain_link(framer, rx_buf, |framer, msg| {
            if let Err(e) = receive(framer, receivers, limit, msg) {
                tracing::warn!(error = %e, "failed to handle packet");
            }
        })
    }

    /// Ask the server for a module's content without waiting for a SIGNAL.
    pub fn request_update(&mut self, name: &ModuleName) -> Result<(), FrameError> {
        if !self.receivers.contains_key(name) {
            tracing::debug!(module = %name, "no receiver, not requesting");
            return Ok(());
        }
        send_update_request(&mut self.framer, name, &[0; 32])
    }
}

impl<L: LinkTransport> BackendClient for RomClient<L> {
    fn register_receiver(&mut self, receiver: Box<dyn Receiver>) {
        let name = receiver.module_name().clone();
        tracing::info!(module = %name, "receiver registered");
        if self.receivers.insert(name.clone(), receiver).is_some() {
            tracing::debug!(module = %name, "replaced previous receiver");
        }
    }
}

fn send_update_request<L: LinkTransport>(
    framer: &mut Framer<L>,
    name: &ModuleName,
    hash: &ContentHash,
) -> Result<(), FrameError> {
    framer.transmit_datagram(size_of::<PacketHeader>(), |w| {
        encode_control(w, PacketType::Update, name, hash)
    })?;
    framer.flush()?;
    tracing::debug!(module = %name, "UPDATE sent");
    Ok(())
}

fn receive<L: LinkTransport>(
    framer: &mut Framer<L>,
    receivers: &mut Registry,
    limit: u32,
    msg: Message<'_>,
) -> Result<(), FrameError> {
    let Some(receiver) = receivers.get_mut(&msg.module) else {
        tracing::debug!(module = %msg.module, kind = ?msg.packet_type(), "no receiver, ignored");
        return Ok(());
    };
    match msg.body {
        MessageBody::Signal => {
            tracing::debug!(module = %msg.module, "SIGNAL received");
            send_update_request(framer, &msg.module, &msg.content_hash)
        }
        MessageBody::Data(fragment) => {
            accept_fragment(receiver.as_mut(), &msg.content_hash, &fragment, limit);
            Ok(())
        }
        // Other clients' requests.
        MessageBody::Update => {
            tracing::trace!(module = %msg.module, "UPDATE ignored");
            Ok(())
        }
    }
}

/// Copy one fragment into the receiver's in-flight buffer; commit after the
/// last one. Content over `limit` bytes is never buffered.
fn accept_fragment(
    receiver: &mut dyn Receiver,
    hash: &ContentHash,
    fragment: &DataFragment<'_>,
    limit: u32,
) -> Option<CommitOutcome> {
    let module = receiver.module_name().clone();

    if fragment.content_size > limit {
        tracing::warn!(
            %module,
            size = fragment.content_size,
            limit,
            "content too large, fragment dropped"
        );
        return None;
    }

    if let Err(e) = fragment.validate() {
        tracing::warn!(%module, error = %e, "malformed DATA fragment");
        if receiver.content_mut(hash).is_some() {
            return Some(receiver.commit_new_content(true));
        }
        return None;
    }

    let size = fragment.content_size as usize;
    let offset = fragment.offset as usize;
    let len = fragment.payload.len();

    let buf = if fragment.offset == 0 {
        receiver.start_new_content(size, *hash)
    } else {
        match receiver.content_mut(hash) {
            Some(buf) => buf,
            None => {
                tracing::debug!(%module, offset, "fragment of no transfer in flight, dropped");
                return None;
            }
        }
    };
    if buf.len() != size {
        tracing::warn!(%module, expected = buf.len(), declared = size, "content size changed mid-transfer");
        return Some(receiver.commit_new_content(true));
    }
    buf[offset..offset + len].copy_from_slice(fragment.payload);

    if fragment.is_last() {
        return Some(receiver.commit_new_content(false));
    }
    None
}
