//! remrom wire format — every header that travels over the link.
//!
//! These types ARE the protocol. Every field and every size is part of the
//! wire format; peers built from different revisions must agree on them.
//!
//! All types are #[repr(C)] over byte arrays and zerocopy big-endian integer
//! wrappers, so they are unaligned, padding free, and decode identically on
//! every host regardless of its native byte order. There is no unsafe code in
//! this module.

use static_assertions::assert_eq_size;
use std::fmt;
use std::str::FromStr;
use zerocopy::byteorder::{NetworkEndian, U16, U32};
use zerocopy::{AsBytes, FromBytes, FromZeroes, Unaligned};

// ── MAC address ──────────────────────────────────────────────────────────────

/// 48-bit Ethernet hardware address.
#[derive(
    Clone, Copy, PartialEq, Eq, Hash, Default, AsBytes, FromBytes, FromZeroes, Unaligned,
)]
#[repr(transparent)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr([0; 6]);

    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MacAddr({self})")
    }
}

impl FromStr for MacAddr {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for byte in out.iter_mut() {
            let part = parts
                .next()
                .ok_or_else(|| WireError::InvalidMac(s.to_string()))?;
            if part.len() != 2 {
                return Err(WireError::InvalidMac(s.to_string()));
            }
            *byte = u8::from_str_radix(part, 16)
                .map_err(|_| WireError::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(WireError::InvalidMac(s.to_string()));
        }
        Ok(MacAddr(out))
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(bytes: [u8; 6]) -> Self {
        MacAddr(bytes)
    }
}

// ── Ethernet ─────────────────────────────────────────────────────────────────

/// Ethernet II header. Wire size: 14 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct EthernetHeader {
    pub dst: MacAddr,
    pub src: MacAddr,
    pub ethertype: U16<NetworkEndian>,
}

assert_eq_size!(EthernetHeader, [u8; 14]);

impl EthernetHeader {
    pub fn new(dst: MacAddr, src: MacAddr, ethertype: u16) -> Self {
        Self {
            dst,
            src,
            ethertype: U16::new(ethertype),
        }
    }
}

// ── ARP ──────────────────────────────────────────────────────────────────────

/// ARP packet for Ethernet hardware and IPv4 protocol addresses.
///
/// Wire size: 28 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct ArpPacket {
    pub htype: U16<NetworkEndian>,
    pub ptype: U16<NetworkEndian>,
    pub hlen: u8,
    pub plen: u8,
    pub opcode: U16<NetworkEndian>,
    pub src_mac: MacAddr,
    pub src_ip: [u8; 4],
    pub dst_mac: MacAddr,
    pub dst_ip: [u8; 4],
}

assert_eq_size!(ArpPacket, [u8; 28]);

impl ArpPacket {
    /// Build a request asking who owns `target_ip`.
    pub fn request(src_mac: MacAddr, src_ip: [u8; 4], target_ip: [u8; 4]) -> Self {
        Self {
            htype: U16::new(ARP_HTYPE_ETHERNET),
            ptype: U16::new(ETHERTYPE_IPV4),
            hlen: 6,
            plen: 4,
            opcode: U16::new(ARP_OP_REQUEST),
            src_mac,
            src_ip,
            dst_mac: MacAddr::ZERO,
            dst_ip: target_ip,
        }
    }

    /// True for the only address family this link speaks: Ethernet + IPv4.
    pub fn is_ethernet_ipv4(&self) -> bool {
        self.htype.get() == ARP_HTYPE_ETHERNET
            && self.ptype.get() == ETHERTYPE_IPV4
            && self.hlen == 6
            && self.plen == 4
    }
}

// ── IPv4 ─────────────────────────────────────────────────────────────────────

/// IPv4 header without options. Wire size: 20 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct Ipv4Header {
    /// High nibble: version (4). Low nibble: header length in 32-bit words.
    pub version_ihl: u8,
    pub dscp_ecn: u8,
    pub total_length: U16<NetworkEndian>,
    pub identification: U16<NetworkEndian>,
    pub flags_fragment: U16<NetworkEndian>,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: U16<NetworkEndian>,
    pub src: [u8; 4],
    pub dst: [u8; 4],
}

assert_eq_size!(Ipv4Header, [u8; 20]);

impl Ipv4Header {
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Header length in bytes, options included.
    pub fn header_len(&self) -> usize {
        usize::from(self.version_ihl & 0x0f) * 4
    }
}

// ── UDP ──────────────────────────────────────────────────────────────────────

/// UDP header. Wire size: 8 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct UdpHeader {
    pub src_port: U16<NetworkEndian>,
    pub dst_port: U16<NetworkEndian>,
    pub length: U16<NetworkEndian>,
    pub checksum: U16<NetworkEndian>,
}

assert_eq_size!(UdpHeader, [u8; 8]);

// ── Application packets ──────────────────────────────────────────────────────

/// Header carried by every SIGNAL, UPDATE and DATA packet.
///
/// Wire size: 100 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct PacketHeader {
    /// Module name, NUL padded. At most 63 significant bytes.
    pub module_name: [u8; MODULE_NAME_LEN],

    /// BLAKE3 hash of the complete module content this packet refers to.
    /// Zero in an UPDATE sent before the requester has seen a SIGNAL.
    pub content_hash: [u8; 32],

    /// One of the PacketType discriminants.
    pub packet_type: U32<NetworkEndian>,
}

assert_eq_size!(PacketHeader, [u8; 100]);

/// Fragment descriptor following the PacketHeader of a DATA packet.
/// The payload bytes follow immediately.
///
/// Wire size: 10 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes, Unaligned)]
#[repr(C)]
pub struct DataHeader {
    /// Total length of the module content.
    pub content_size: U32<NetworkEndian>,
    /// Position of this fragment within the content.
    pub offset: U32<NetworkEndian>,
    /// Number of payload bytes in this fragment. Never above MAX_PAYLOAD.
    pub payload_size: U16<NetworkEndian>,
}

assert_eq_size!(DataHeader, [u8; 10]);

/// Application message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PacketType {
    /// Producer to consumers: content changed.
    Signal = 1,
    /// Consumer to producer: please stream the content.
    Update = 2,
    /// Producer to consumers: one fragment of the content.
    Data = 3,
}

impl TryFrom<u32> for PacketType {
    type Error = WireError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(PacketType::Signal),
            2 => Ok(PacketType::Update),
            3 => Ok(PacketType::Data),
            other => Err(WireError::UnknownPacketType(other)),
        }
    }
}

impl From<PacketType> for u32 {
    fn from(t: PacketType) -> u32 {
        t as u32
    }
}

// ── Constants ────────────────────────────────────────────────────────────────

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const ARP_HTYPE_ETHERNET: u16 = 1;
pub const ARP_OP_REQUEST: u16 = 1;
pub const ARP_OP_REPLY: u16 = 2;

pub const IPPROTO_UDP: u8 = 17;

/// IPv4 limited broadcast, 255.255.255.255.
pub const IPV4_BROADCAST: [u8; 4] = [0xff; 4];

/// Default UDP destination port the protocol listens on.
pub const DEFAULT_UDP_PORT: u16 = 9009;

/// Source port stamped on every outbound datagram.
pub const SRC_UDP_PORT: u16 = 51234;

/// Time-to-live of outbound IPv4 datagrams.
pub const DEFAULT_TTL: u8 = 10;

/// Width of the module name field, terminating NUL included.
pub const MODULE_NAME_LEN: usize = 64;

/// Maximum DATA payload per fragment.
pub const MAX_PAYLOAD: usize = 1024;

/// Bytes in front of the application packet header.
pub const FRAME_HEADERS_LEN: usize = 14 + 20 + 8;

/// Largest frame the protocol ever emits: one full DATA fragment.
pub const MAX_FRAME_LEN: usize = FRAME_HEADERS_LEN + 100 + 10 + MAX_PAYLOAD;

/// Size of each transmit buffer handed out by a link.
pub const PACKET_BUFFER_SIZE: usize = 1600;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u32),

    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_fields_are_big_endian() {
        let hdr = DataHeader {
            content_size: U32::new(0x0102_0304),
            offset: U32::new(0x0000_0400),
            payload_size: U16::new(0x0400),
        };
        assert_eq!(
            hdr.as_bytes(),
            &[0x01, 0x02, 0x03, 0x04, 0x00, 0x00, 0x04, 0x00, 0x04, 0x00]
        );
    }

    #[test]
    fn packet_header_type_sits_after_hash() {
        let mut hdr = PacketHeader::new_zeroed();
        hdr.packet_type = U32::new(PacketType::Data.into());
        let bytes = hdr.as_bytes();
        assert_eq!(bytes.len(), 100);
        assert_eq!(&bytes[96..], &[0, 0, 0, 3]);
    }

    #[test]
    fn arp_request_layout() {
        let mac = MacAddr([2, 0, 0, 0, 0, 1]);
        let arp = ArpPacket::request(mac, [10, 0, 0, 1], [10, 0, 0, 2]);
        let bytes = arp.as_bytes();
        assert_eq!(&bytes[0..2], &[0x00, 0x01]);
        assert_eq!(&bytes[2..4], &[0x08, 0x00]);
        assert_eq!(&bytes[6..8], &[0x00, 0x01]);
        assert_eq!(&bytes[8..14], &mac.0);
        assert_eq!(&bytes[24..28], &[10, 0, 0, 2]);
        assert!(arp.is_ethernet_ipv4());
    }

    #[test]
    fn ipv4_version_and_length() {
        let mut hdr = Ipv4Header::new_zeroed();
        hdr.version_ihl = 0x45;
        assert_eq!(hdr.version(), 4);
        assert_eq!(hdr.header_len(), 20);
    }

    #[test]
    fn packet_type_round_trip() {
        for t in [PacketType::Signal, PacketType::Update, PacketType::Data] {
            assert_eq!(PacketType::try_from(u32::from(t)).unwrap(), t);
        }
        assert_eq!(
            PacketType::try_from(9).unwrap_err(),
            WireError::UnknownPacketType(9)
        );
    }

    #[test]
    fn mac_parse_and_display() {
        let mac: MacAddr = "02:00:5e:10:00:ff".parse().unwrap();
        assert_eq!(mac.0, [0x02, 0x00, 0x5e, 0x10, 0x00, 0xff]);
        assert_eq!(mac.to_string(), "02:00:5e:10:00:ff");
        assert!("02:00:5e:10:00".parse::<MacAddr>().is_err());
        assert!("02:00:5e:10:00:ff:01".parse::<MacAddr>().is_err());
        assert!("zz:00:5e:10:00:ff".parse::<MacAddr>().is_err());
        assert!(MacAddr::BROADCAST.is_broadcast());
    }

    #[test]
    fn largest_frame_fits_buffer() {
        assert_eq!(MAX_FRAME_LEN, 1176);
        assert!(MAX_FRAME_LEN <= PACKET_BUFFER_SIZE);
    }
}
