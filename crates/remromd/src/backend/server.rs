//! Producer backend: announces content changes and streams content on request.
//!
//! Empty content is never announced. A source that shrinks to zero bytes
//! leaves consumers holding the last content they committed; there is no
//! zero-length commit on the wire.

use remrom_core::packet::{encode_control, encode_data, Message, MessageBody};
use remrom_core::wire::{DataHeader, PacketHeader, PacketType, MAX_PAYLOAD};
use remrom_core::ModuleName;
use remrom_services::{BackendServer, Forwarder};
use std::collections::HashMap;
use std::mem::size_of;

use super::{drain_link, rx_buffer};
use crate::link::framer::{FrameError, Framer};
use crate::link::{LinkError, LinkTransport};

type Registry = HashMap<ModuleName, Box<dyn Forwarder>>;

pub struct RomServer<L> {
    framer: Framer<L>,
    forwarders: Registry,
    rx_buf: Vec<u8>,
}

impl<L: LinkTransport> RomServer<L> {
    pub fn new(framer: Framer<L>) -> Self {
        Self {
            framer,
            forwarders: HashMap::new(),
            rx_buf: rx_buffer(),
        }
    }

    pub fn framer(&self) -> &Framer<L> {
        &self.framer
    }

    pub fn framer_mut(&mut self) -> &mut Framer<L> {
        &mut self.framer
    }

    pub fn modules(&self) -> impl Iterator<Item = &ModuleName> {
        self.forwarders.keys()
    }

    /// Handle every frame waiting on the link.
    pub fn poll_link(&mut self) -> Result<usize, LinkError> {
        let Self {
            framer,
            forwarders,
            rx_buf,
        } = self;
        drain_link(framer, rx_buf, |framer, msg| {
            if let Err(e) = receive(framer, forwarders, msg) {
                tracing::warn!(error = %e, "failed to answer packet");
            }
        })
    }

    /// SIGNAL every registered module.
    pub fn send_updates(&mut self) {
        let names: Vec<ModuleName> = self.forwarders.keys().cloned().collect();
        for name in &names {
            self.send_update(name);
        }
    }
}

impl<L: LinkTransport> BackendServer for RomServer<L> {
    fn register_forwarder(&mut self, forwarder: Box<dyn Forwarder>) {
        let name = forwarder.module_name().clone();
        tracing::info!(module = %name, size = forwarder.content_size(), "forwarder registered");
        if self.forwarders.insert(name.clone(), forwarder).is_some() {
            tracing::debug!(module = %name, "replaced previous forwarder");
        }
    }

    fn send_update(&mut self, name: &ModuleName) {
        let Some(forwarder) = self.forwarders.get(name) else {
            tracing::debug!(module = %name, "no forwarder, not signalling");
            return;
        };
        if forwarder.content_size() == 0 {
            tracing::debug!(module = %name, "no content, not signalling");
            return;
        }
        let hash = forwarder.content_hash();
        let sent = self
            .framer
            .transmit_datagram(size_of::<PacketHeader>(), |w| {
                encode_control(w, PacketType::Signal, name, &hash)
            })
            .and_then(|sent| {
                self.framer.flush()?;
                Ok(sent)
            });
        match sent {
            Ok(true) => tracing::debug!(module = %name, "SIGNAL sent"),
            Ok(false) => {}
            Err(e) => tracing::warn!(module = %name, error = %e, "failed to send SIGNAL"),
        }
    }
}

fn receive<L: LinkTransport>(
    framer: &mut Framer<L>,
    forwarders: &Registry,
    msg: Message<'_>,
) -> Result<(), FrameError> {
    match msg.body {
        MessageBody::Update => {
            let Some(forwarder) = forwarders.get(&msg.module) else {
                tracing::debug!(module = %msg.module, "UPDATE for unknown module ignored");
                return Ok(());
            };
            tracing::debug!(module = %msg.module, "UPDATE received");
            stream_content(framer, forwarder.as_ref())
        }
        // Other servers' traffic.
        MessageBody::Signal | MessageBody::Data(_) => {
            tracing::trace!(module = %msg.module, kind = ?msg.packet_type(), "ignored");
            Ok(())
        }
    }
}

/// Send the whole content as DATA fragments of at most MAX_PAYLOAD bytes,
/// in offset order, without pacing.
fn stream_content<L: LinkTransport>(
    framer: &mut Framer<L>,
    forwarder: &dyn Forwarder,
) -> Result<(), FrameError> {
    let name = forwarder.module_name();
    let size = forwarder.content_size();
    let Ok(content_size) = u32::try_from(size) else {
        tracing::error!(module = %name, size, "content too large for the wire format");
        return Ok(());
    };
    let hash = forwarder.content_hash();
    let overhead = size_of::<PacketHeader>() + size_of::<DataHeader>();

    let mut offset = 0usize;
    let mut fragments = 0usize;
    while offset < size {
        let chunk = MAX_PAYLOAD.min(size - offset);
        // offset < size <= u32::MAX
        let wire_offset = offset as u32;
        framer.transmit_datagram(overhead + chunk, |w| {
            encode_data(w, name, &hash, content_size, wire_offset, chunk, |dst| {
                forwarder.transfer_content(dst, offset)
            })
            .map(|_| ())
        })?;
        offset += chunk;
        fragments += 1;
    }
    framer.flush()?;
    tracing::debug!(module = %name, size, fragments, "content streamed");
    Ok(())
}
