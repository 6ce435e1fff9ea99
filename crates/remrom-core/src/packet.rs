//! SIGNAL / UPDATE / DATA packets layered on the UDP payload.
//!
//! Decoding borrows the payload straight out of the receive buffer. DATA
//! fragments are decoded leniently and checked separately with
//! `DataFragment::validate`, so a receiver can still tell which transfer a
//! malformed fragment belonged to and abort it.

use crate::checksum::ContentHash;
use crate::guard::{FrameReader, FrameWriter, GuardExceeded};
use crate::wire::{DataHeader, PacketHeader, PacketType, WireError, MAX_PAYLOAD, MODULE_NAME_LEN};
use std::borrow::Borrow;
use std::fmt;
use zerocopy::byteorder::{U16, U32};

// ── Module names ─────────────────────────────────────────────────────────────

/// Name of a ROM module. Non-empty, at most 63 bytes, no NUL.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleName(String);

impl ModuleName {
    pub const MAX_LEN: usize = MODULE_NAME_LEN - 1;

    pub fn new(name: impl Into<String>) -> Result<Self, PacketError> {
        let name = name.into();
        if name.is_empty() || name.len() > Self::MAX_LEN || name.contains('\0') {
            return Err(PacketError::InvalidModuleName(name));
        }
        Ok(Self(name))
    }

    /// Decode the NUL-padded wire field.
    pub fn from_field(field: &[u8; MODULE_NAME_LEN]) -> Result<Self, PacketError> {
        let end = field
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| PacketError::InvalidModuleName(String::from_utf8_lossy(field).into()))?;
        let name = std::str::from_utf8(&field[..end])
            .map_err(|_| PacketError::InvalidModuleName(String::from_utf8_lossy(&field[..end]).into()))?;
        Self::new(name)
    }

    /// Encode as the NUL-padded wire field.
    pub fn to_field(&self) -> [u8; MODULE_NAME_LEN] {
        let mut field = [0u8; MODULE_NAME_LEN];
        field[..self.0.len()].copy_from_slice(self.0.as_bytes());
        field
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ModuleName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl Borrow<str> for ModuleName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ModuleName {
    type Error = PacketError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

// ── Decoded messages ─────────────────────────────────────────────────────────

/// A decoded application packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message<'a> {
    pub module: ModuleName,
    pub content_hash: ContentHash,
    pub body: MessageBody<'a>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody<'a> {
    Signal,
    Update,
    Data(DataFragment<'a>),
}

/// One DATA fragment, as found on the wire. Not yet validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFragment<'a> {
    pub content_size: u32,
    pub offset: u32,
    /// Declared payload length.
    pub payload_size: u16,
    /// Payload bytes present in the frame, at most `payload_size` of them.
    pub payload: &'a [u8],
}

impl DataFragment<'_> {
    /// Check the fragment against the fixed protocol limits.
    pub fn validate(&self) -> Result<(), PacketError> {
        let declared = usize::from(self.payload_size);
        if declared > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLarge(declared));
        }
        if self.payload.len() < declared {
            return Err(PacketError::TruncatedPayload {
                declared,
                actual: self.payload.len(),
            });
        }
        let end = u64::from(self.offset) + declared as u64;
        if end > u64::from(self.content_size) {
            return Err(PacketError::FragmentOutOfBounds {
                offset: self.offset,
                len: declared,
                content_size: self.content_size,
            });
        }
        Ok(())
    }

    /// True when this fragment reaches the end of the content.
    pub fn is_last(&self) -> bool {
        u64::from(self.offset) + u64::from(self.payload_size) >= u64::from(self.content_size)
    }
}

impl<'a> Message<'a> {
    pub fn packet_type(&self) -> PacketType {
        match self.body {
            MessageBody::Signal => PacketType::Signal,
            MessageBody::Update => PacketType::Update,
            MessageBody::Data(_) => PacketType::Data,
        }
    }

    /// Decode a packet from a UDP payload.
    pub fn decode(payload: &'a [u8]) -> Result<Self, PacketError> {
        let mut r = FrameReader::new(payload);
        let header: PacketHeader = r.read()?;
        let module = ModuleName::from_field(&header.module_name)?;
        let content_hash = header.content_hash;
        let body = match PacketType::try_from(header.packet_type.get())? {
            PacketType::Signal => MessageBody::Signal,
            PacketType::Update => MessageBody::Update,
            PacketType::Data => {
                let data: DataHeader = r.read()?;
                let payload_size = data.payload_size.get();
                let rest = r.rest();
                let present = rest.len().min(usize::from(payload_size));
                MessageBody::Data(DataFragment {
                    content_size: data.content_size.get(),
                    offset: data.offset.get(),
                    payload_size,
                    payload: &rest[..present],
                })
            }
        };
        Ok(Self {
            module,
            content_hash,
            body,
        })
    }
}

// ── Encoding ─────────────────────────────────────────────────────────────────

fn header(kind: PacketType, module: &ModuleName, hash: &ContentHash) -> PacketHeader {
    PacketHeader {
        module_name: module.to_field(),
        content_hash: *hash,
        packet_type: U32::new(kind.into()),
    }
}

/// Write a SIGNAL or UPDATE packet.
pub fn encode_control(
    w: &mut FrameWriter<'_>,
    kind: PacketType,
    module: &ModuleName,
    hash: &ContentHash,
) -> Result<(), GuardExceeded> {
    debug_assert!(kind != PacketType::Data);
    w.put(&header(kind, module, hash))
}

/// Write a DATA packet whose payload is produced by `fill`.
///
/// `fill` receives a slice of at most `max_payload` bytes (capped at
/// MAX_PAYLOAD) and returns how many it wrote.
pub fn encode_data<F>(
    w: &mut FrameWriter<'_>,
    module: &ModuleName,
    hash: &ContentHash,
    content_size: u32,
    offset: u32,
    max_payload: usize,
    fill: F,
) -> Result<usize, GuardExceeded>
where
    F: FnOnce(&mut [u8]) -> usize,
{
    w.put(&header(PacketType::Data, module, hash))?;
    let data_range = w.reserve(std::mem::size_of::<DataHeader>())?;
    let cap = max_payload.min(MAX_PAYLOAD);
    if w.remaining() < cap {
        return Err(GuardExceeded {
            offset: w.position(),
            needed: cap,
            available: w.remaining(),
        });
    }
    let written = fill(&mut w.tail_mut()[..cap]).min(cap);
    w.advance(written)?;
    let data = DataHeader {
        content_size: U32::new(content_size),
        offset: U32::new(offset),
        // written <= MAX_PAYLOAD, fits u16
        payload_size: U16::new(written as u16),
    };
    w.buffer_mut()[data_range].copy_from_slice(zerocopy::AsBytes::as_bytes(&data));
    Ok(written)
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Guard(#[from] GuardExceeded),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("invalid module name: {0:?}")]
    InvalidModuleName(String),

    #[error("payload size {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("payload truncated: declared {declared}, present {actual}")]
    TruncatedPayload { declared: usize, actual: usize },

    #[error("fragment {offset}+{len} exceeds content size {content_size}")]
    FragmentOutOfBounds {
        offset: u32,
        len: usize,
        content_size: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::content_hash;

    fn name(s: &str) -> ModuleName {
        ModuleName::new(s).unwrap()
    }

    #[test]
    fn module_name_limits() {
        assert!(ModuleName::new("").is_err());
        assert!(ModuleName::new("a\0b").is_err());
        assert!(ModuleName::new("x".repeat(63)).is_ok());
        assert!(ModuleName::new("x".repeat(64)).is_err());

        let field = name("config").to_field();
        assert_eq!(&field[..7], b"config\0");
        assert_eq!(ModuleName::from_field(&field).unwrap(), name("config"));

        // No terminator inside the field.
        assert!(ModuleName::from_field(&[b'a'; 64]).is_err());
    }

    #[test]
    fn signal_encodes_header_only() {
        let mut buf = [0u8; 128];
        let hash = content_hash(b"CAFEBABE");
        let len = {
            let mut w = FrameWriter::new(&mut buf);
            encode_control(&mut w, PacketType::Signal, &name("config"), &hash).unwrap();
            w.position()
        };
        assert_eq!(len, 100);
        let msg = Message::decode(&buf[..len]).unwrap();
        assert_eq!(msg.module, name("config"));
        assert_eq!(msg.content_hash, hash);
        assert_eq!(msg.body, MessageBody::Signal);
        assert_eq!(msg.packet_type(), PacketType::Signal);
    }

    #[test]
    fn data_payload_written_in_place() {
        let mut buf = [0u8; 1200];
        let hash = content_hash(b"CAFEBABE");
        let len = {
            let mut w = FrameWriter::new(&mut buf);
            let n = encode_data(&mut w, &name("config"), &hash, 8, 0, 8, |dst| {
                dst[..8].copy_from_slice(b"CAFEBABE");
                8
            })
            .unwrap();
            assert_eq!(n, 8);
            w.position()
        };
        assert_eq!(len, 118);
        let msg = Message::decode(&buf[..len]).unwrap();
        let MessageBody::Data(frag) = msg.body else {
            panic!("expected DATA");
        };
        assert_eq!(frag.content_size, 8);
        assert_eq!(frag.offset, 0);
        assert_eq!(frag.payload, b"CAFEBABE");
        assert!(frag.validate().is_ok());
        assert!(frag.is_last());
    }

    #[test]
    fn fragment_validation() {
        let ok = DataFragment {
            content_size: 2048,
            offset: 1024,
            payload_size: 1024,
            payload: &[0u8; 1024],
        };
        assert!(ok.validate().is_ok());

        let too_large = DataFragment {
            payload_size: 1025,
            payload: &[0u8; 1025],
            content_size: 4096,
            ..ok
        };
        assert_eq!(too_large.validate(), Err(PacketError::PayloadTooLarge(1025)));

        let truncated = DataFragment {
            payload: &[0u8; 10],
            ..ok
        };
        assert!(matches!(
            truncated.validate(),
            Err(PacketError::TruncatedPayload { declared: 1024, actual: 10 })
        ));

        let out_of_bounds = DataFragment {
            offset: 1025,
            ..ok
        };
        assert!(matches!(
            out_of_bounds.validate(),
            Err(PacketError::FragmentOutOfBounds { .. })
        ));
    }

    #[test]
    fn unknown_type_rejected() {
        let mut hdr = header(PacketType::Signal, &name("config"), &[0; 32]);
        hdr.packet_type = U32::new(7);
        let bytes = zerocopy::AsBytes::as_bytes(&hdr).to_vec();
        assert_eq!(
            Message::decode(&bytes),
            Err(PacketError::Wire(WireError::UnknownPacketType(7)))
        );
    }

    #[test]
    fn short_packet_rejected() {
        assert!(matches!(
            Message::decode(&[0u8; 40]),
            Err(PacketError::Guard(_))
        ));
    }
}
