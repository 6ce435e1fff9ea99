//! Protocol backends: the producer side (`RomServer`) and the consumer side
//! (`RomClient`). Both own a `Framer` and a registry of ROM roles keyed by
//! module name.

pub mod client;
pub mod server;

pub use client::RomClient;
pub use server::RomServer;

use remrom_core::packet::Message;
use remrom_core::wire::PACKET_BUFFER_SIZE;

use crate::link::framer::Framer;
use crate::link::{LinkError, LinkTransport};

/// Receive buffer for one inbound frame.
pub(crate) fn rx_buffer() -> Vec<u8> {
    vec![0u8; PACKET_BUFFER_SIZE]
}

/// Read every pending frame from the link and hand decoded packets to
/// `on_packet`. Malformed frames and packets are logged and dropped.
/// Returns the number of frames read.
pub(crate) fn drain_link<L, F>(
    framer: &mut Framer<L>,
    buf: &mut [u8],
    mut on_packet: F,
) -> Result<usize, LinkError>
where
    L: LinkTransport,
    F: FnMut(&mut Framer<L>, Message<'_>),
{
    let mut frames = 0;
    while let Some(len) = framer.recv_frame(buf)? {
        frames += 1;
        let payload = match framer.handle_frame(&mut buf[..len]) {
            Ok(Some(range)) => range,
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!(error = %e, len, "dropping frame");
                continue;
            }
        };
        match Message::decode(&buf[payload]) {
            Ok(msg) => on_packet(framer, msg),
            Err(e) => tracing::warn!(error = %e, "dropping packet"),
        }
    }
    // ARP replies queued while handling frames go out now.
    framer.flush()?;
    Ok(frames)
}
