use crate::*;
use remrom_core::wire::{PacketType, FRAME_HEADERS_LEN};

const TYPE_OFFSET: usize = FRAME_HEADERS_LEN + 64 + 32;
const DATA_PAYLOAD_OFFSET: usize = FRAME_HEADERS_LEN + 100 + 10;

fn is_data(frame: &[u8]) -> bool {
    frame.len() > DATA_PAYLOAD_OFFSET
        && frame[TYPE_OFFSET..TYPE_OFFSET + 4] == (PacketType::Data as u32).to_be_bytes()
}

/// Loss in the middle of a transfer leaves the old content in place; the
/// next SIGNAL restarts the transfer from offset 0.
#[test]
fn test_lost_fragment_never_commits() {
    let mut link = Link::new(Addressing::Unicast);
    let content = pattern(3000);
    serve(&mut link, "config", &content);
    let consumer = consume(&mut link, "config", Some(&b"<default/>"[..]));

    let mut seen = 0;
    link.server.send_update(&module("config"));
    link.pump_with(|frame| {
        if is_data(frame) {
            seen += 1;
            if seen == 2 {
                return None;
            }
        }
        Some(())
    });
    assert_eq!(seen, 3);
    assert_eq!(consumer.session.dataspace(), Bytes::from_static(b"<default/>"));
    assert_eq!(consumer.signal.count(), 0);

    link.server.send_update(&module("config"));
    link.pump();
    assert_eq!(consumer.session.dataspace(), Bytes::from(content));
    assert_eq!(consumer.signal.count(), 1);
}

/// Without UDP checksums the integrity hash is the only thing catching a
/// damaged payload. The previous content must survive.
#[test]
fn test_corrupted_payload_rejected_by_hash() {
    let mut link = Link::with_server_config(
        Addressing::Unicast,
        FramerConfig {
            src_ip: Some(SERVER_IP),
            dst_ip: Some(CLIENT_IP),
            chksum_offload: true,
            ..FramerConfig::default()
        },
    );
    let forwarder = serve(&mut link, "config", b"good content");
    let consumer = consume(&mut link, "config", None);

    link.server.send_update(&module("config"));
    link.pump();
    assert_eq!(consumer.session.dataspace(), Bytes::from_static(b"good content"));

    forwarder.update_content(Bytes::from_static(b"newer content"));
    link.server.send_update(&module("config"));
    link.pump_with(|frame| {
        if is_data(frame) {
            frame[DATA_PAYLOAD_OFFSET] ^= 0x01;
        }
        Some(())
    });

    assert_eq!(consumer.session.dataspace(), Bytes::from_static(b"good content"));
    assert_eq!(consumer.signal.count(), 1);
}

/// With UDP checksums on, damage is caught at the framer and the frame is
/// dropped before it reaches the module.
#[test]
fn test_corrupted_frame_dropped_by_checksum() {
    let mut link = Link::new(Addressing::Unicast);
    serve(&mut link, "config", b"CAFEBABE");
    let consumer = consume(&mut link, "config", None);

    link.server.send_update(&module("config"));
    link.pump_with(|frame| {
        if is_data(frame) {
            frame[DATA_PAYLOAD_OFFSET] ^= 0x80;
        }
        Some(())
    });

    assert!(!consumer.root.has_content());
    assert_eq!(consumer.signal.count(), 0);
    assert_eq!(link.client.framer().stats().rx_dropped, 1);
}

#[test]
fn test_truncated_frames_dropped() {
    let mut link = Link::new(Addressing::Broadcast);
    serve(&mut link, "config", &pattern(1500));
    let consumer = consume(&mut link, "config", None);

    link.server.send_update(&module("config"));
    link.pump_with(|frame| {
        if is_data(frame) {
            frame.truncate(DATA_PAYLOAD_OFFSET - 4);
        }
        Some(())
    });

    assert!(!consumer.root.has_content());
    assert_eq!(link.client.framer().stats().rx_dropped, 2);
}

/// SIGNALs for content nobody consumes cost one frame and nothing more.
#[test]
fn test_unknown_module_signal_ignored() {
    let mut link = Link::new(Addressing::Broadcast);
    serve(&mut link, "state", b"not wanted");
    let consumer = consume(&mut link, "config", None);

    link.server.send_update(&module("state"));
    link.pump();

    assert!(!consumer.root.has_content());
    assert_eq!(link.client.framer().stats().tx_frames, 0);
    assert_eq!(link.server.framer().stats().tx_frames, 1);
}

/// Content over the client's size limit is never buffered; the default stays.
#[test]
fn test_oversized_content_dropped_by_client() {
    let mut link = Link::new(Addressing::Unicast).with_client_limit(2048);
    serve(&mut link, "config", &pattern(3000));
    let consumer = consume(&mut link, "config", Some(&b"<default/>"[..]));

    link.server.send_update(&module("config"));
    link.pump();

    assert_eq!(consumer.session.dataspace(), Bytes::from_static(b"<default/>"));
    assert_eq!(consumer.signal.count(), 0);
    assert!(!consumer.root.has_content());
}
