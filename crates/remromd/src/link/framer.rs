//! Ethernet / ARP / IPv4 / UDP framing over a raw link.
//!
//! Inbound frames are parsed through the checked cursors in
//! `remrom_core::guard`; anything malformed comes back as a `FrameError` and
//! the caller drops the frame. Outbound datagrams are written straight into
//! link transmit buffers; lengths and checksums are patched in once the
//! payload is known.

use remrom_core::checksum::{ipv4_header_checksum, udp_checksum_ipv4, udp_checksum_valid};
use remrom_core::config::{ConfigError, RemromConfig};
use remrom_core::guard::{view_mut, FrameReader, FrameWriter, GuardExceeded};
use remrom_core::wire::{
    ArpPacket, EthernetHeader, Ipv4Header, UdpHeader, ARP_OP_REPLY, ARP_OP_REQUEST,
    DEFAULT_TTL, DEFAULT_UDP_PORT, ETHERTYPE_ARP, ETHERTYPE_IPV4, FRAME_HEADERS_LEN,
    IPPROTO_UDP, IPV4_BROADCAST, SRC_UDP_PORT,
};
use remrom_core::MacAddr;
use std::net::Ipv4Addr;
use std::ops::Range;
use std::time::{Duration, Instant};
use zerocopy::byteorder::U16;
use zerocopy::AsBytes;

use super::arp::{ArpAction, ArpResolver};
use super::{LinkError, LinkTransport, PacketDescriptor};

const ETH_LEN: usize = 14;
const ARP_LEN: usize = 28;
const IPV4_LEN: usize = 20;
const UDP_LEN: usize = 8;

/// Allocation attempts, each preceded by a synchronous `process_events`,
/// before an outbound frame is dropped.
pub const MAX_ALLOC_RETRIES: usize = 64;

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FramerConfig {
    /// Local address. None = accept every destination, send from 0.0.0.0.
    pub src_ip: Option<Ipv4Addr>,
    /// Peer address. None = send to 255.255.255.255 and skip ARP.
    pub dst_ip: Option<Ipv4Addr>,
    pub dst_mac: Option<MacAddr>,
    pub udp_port: u16,
    pub chksum_offload: bool,
    pub arp_retry_interval: Duration,
    pub arp_max_retries: u32,
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            src_ip: None,
            dst_ip: None,
            dst_mac: None,
            udp_port: DEFAULT_UDP_PORT,
            chksum_offload: false,
            arp_retry_interval: Duration::from_secs(1),
            arp_max_retries: 5,
        }
    }
}

impl FramerConfig {
    pub fn from_config(config: &RemromConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            src_ip: config.network.src,
            dst_ip: config.network.dst,
            dst_mac: config.network.peer_mac()?,
            udp_port: config.network.udp_port,
            chksum_offload: config.network.chksum_offload,
            arp_retry_interval: config.arp.retry_interval(),
            arp_max_retries: config.arp.max_retries,
        })
    }
}

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error(transparent)]
    Guard(#[from] GuardExceeded),
    #[error(transparent)]
    Link(#[from] LinkError),
    #[error("malformed frame: {0}")]
    Malformed(&'static str),
    #[error("bad {0} checksum")]
    BadChecksum(&'static str),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramerStats {
    pub rx_frames: u64,
    pub rx_dropped: u64,
    pub rx_delivered: u64,
    pub tx_frames: u64,
    pub tx_dropped: u64,
    pub arp_replies: u64,
    pub arp_requests: u64,
}

// ── Framer ───────────────────────────────────────────────────────────────────

pub struct Framer<L> {
    link: L,
    config: FramerConfig,
    arp: ArpResolver,
    ip_id: u16,
    stats: FramerStats,
}

impl<L: LinkTransport> Framer<L> {
    pub fn new(link: L, config: FramerConfig) -> Self {
        let mut arp = ArpResolver::new(
            config.dst_ip,
            config.arp_retry_interval,
            config.arp_max_retries,
        );
        if let Some(mac) = config.dst_mac {
            arp = arp.with_static(mac);
        }
        Self {
            link,
            config,
            arp,
            ip_id: 0,
            stats: FramerStats::default(),
        }
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn arp(&self) -> &ArpResolver {
        &self.arp
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, LinkError> {
        self.link.recv_frame(buf)
    }

    /// Process one inbound frame. Returns the byte range of the UDP payload
    /// when the frame carries a datagram for our port; ARP is handled here.
    pub fn handle_frame(&mut self, frame: &mut [u8]) -> Result<Option<Range<usize>>, FrameError> {
        self.stats.rx_frames += 1;
        let result = self.dispatch_frame(frame);
        match &result {
            Ok(Some(_)) => self.stats.rx_delivered += 1,
            Ok(None) => {}
            Err(_) => self.stats.rx_dropped += 1,
        }
        result
    }

    fn dispatch_frame(&mut self, frame: &mut [u8]) -> Result<Option<Range<usize>>, FrameError> {
        let eth: EthernetHeader = FrameReader::new(frame).read()?;
        match eth.ethertype.get() {
            ETHERTYPE_ARP => {
                self.handle_arp(frame)?;
                Ok(None)
            }
            ETHERTYPE_IPV4 => self.handle_ipv4(&eth, frame),
            other => {
                tracing::trace!(ethertype = other, "ignoring frame");
                Ok(None)
            }
        }
    }

    fn handle_arp(&mut self, frame: &mut [u8]) -> Result<(), FrameError> {
        let local_mac = self.link.mac_address();
        let arp: &mut ArpPacket = view_mut(frame, ETH_LEN)?;
        if !arp.is_ethernet_ipv4() {
            tracing::trace!("ignoring non Ethernet/IPv4 ARP");
            return Ok(());
        }

        match arp.opcode.get() {
            ARP_OP_REQUEST => {
                let Some(local) = self.config.src_ip else {
                    return Ok(());
                };
                if arp.dst_ip != local.octets() {
                    return Ok(());
                }
                // Turn the request around in place.
                std::mem::swap(&mut arp.src_ip, &mut arp.dst_ip);
                arp.dst_mac = arp.src_mac;
                arp.src_mac = local_mac;
                arp.opcode = U16::new(ARP_OP_REPLY);

                let eth: &mut EthernetHeader = view_mut(frame, 0)?;
                eth.dst = eth.src;
                eth.src = local_mac;
                let requester = eth.dst;

                if self.send(&frame[..ETH_LEN + ARP_LEN])? {
                    self.stats.arp_replies += 1;
                    tracing::debug!(%requester, "answered ARP request");
                }
            }
            ARP_OP_REPLY => {
                let ip = Ipv4Addr::from(arp.src_ip);
                let mac = arp.src_mac;
                if self.arp.handle_reply(ip, mac) {
                    tracing::info!(peer = %ip, %mac, "peer resolved");
                }
            }
            op => tracing::trace!(op, "ignoring ARP opcode"),
        }
        Ok(())
    }

    fn handle_ipv4(
        &mut self,
        eth: &EthernetHeader,
        frame: &[u8],
    ) -> Result<Option<Range<usize>>, FrameError> {
        let mut r = FrameReader::new(frame);
        r.skip(ETH_LEN)?;
        let ip: Ipv4Header = r.read()?;

        if ip.version() != 4 || ip.header_len() < IPV4_LEN {
            return Err(FrameError::Malformed("IPv4 version or header length"));
        }
        let total = usize::from(ip.total_length.get());
        if total < ip.header_len() || ETH_LEN + total > frame.len() {
            return Err(FrameError::Malformed("IPv4 total length"));
        }
        if ipv4_header_checksum(&frame[ETH_LEN..ETH_LEN + ip.header_len()]) != 0 {
            return Err(FrameError::BadChecksum("IPv4 header"));
        }

        let dst = ip.dst;
        let accepted = match self.config.src_ip {
            None => true,
            Some(local) => dst == local.octets() || dst == IPV4_BROADCAST,
        };
        if !accepted {
            tracing::trace!(dst = %Ipv4Addr::from(dst), "IPv4 not for us");
            return Ok(None);
        }

        let src = Ipv4Addr::from(ip.src);
        if self.arp.learn(src, eth.src) {
            tracing::info!(peer = %src, mac = %eth.src, "peer MAC learned from traffic");
        }

        if ip.protocol != IPPROTO_UDP {
            return Ok(None);
        }
        // Fragments are never produced by peers; drop them.
        if ip.flags_fragment.get() & 0x3fff != 0 {
            return Err(FrameError::Malformed("IPv4 fragment"));
        }

        let udp_start = ETH_LEN + ip.header_len();
        let datagram = &frame[udp_start..ETH_LEN + total];
        let udp: UdpHeader = FrameReader::new(datagram).read()?;
        let udp_len = usize::from(udp.length.get());
        if udp_len < UDP_LEN || udp_len > datagram.len() {
            return Err(FrameError::Malformed("UDP length"));
        }
        if udp.dst_port.get() != self.config.udp_port {
            tracing::trace!(port = udp.dst_port.get(), "UDP port not ours");
            return Ok(None);
        }
        if !udp_checksum_valid(&ip.src, &ip.dst, &datagram[..udp_len]) {
            return Err(FrameError::BadChecksum("UDP"));
        }

        Ok(Some(udp_start + UDP_LEN..udp_start + udp_len))
    }

    // ── Transmit ─────────────────────────────────────────────────────────────

    /// Build and submit one datagram. `fill` writes at most `max_payload`
    /// bytes of UDP payload. Returns false if the frame had to be dropped
    /// because no transmit buffer became free.
    pub fn transmit_datagram<F>(&mut self, max_payload: usize, fill: F) -> Result<bool, FrameError>
    where
        F: FnOnce(&mut FrameWriter<'_>) -> Result<(), GuardExceeded>,
    {
        if self.arp.needs_request() {
            self.send_arp_request(Instant::now())?;
        }
        let Some(mut pd) = self.alloc_tx(FRAME_HEADERS_LEN + max_payload)? else {
            return Ok(false);
        };

        self.ip_id = self.ip_id.wrapping_add(1);
        let header = DatagramHeader {
            src_mac: self.link.mac_address(),
            dst_mac: self.arp.peer_mac(),
            src_ip: self.config.src_ip.unwrap_or(Ipv4Addr::UNSPECIFIED).octets(),
            dst_ip: self.config.dst_ip.unwrap_or(Ipv4Addr::BROADCAST).octets(),
            id: self.ip_id,
            dst_port: self.config.udp_port,
            udp_checksum: !self.config.chksum_offload,
        };

        let buf = self.link.packet_content(&pd);
        let len = match header.write(buf, fill) {
            Ok(len) => len,
            Err(e) => {
                self.link.release_packet(pd);
                return Err(e.into());
            }
        };
        pd.truncate(len);
        self.submit(pd)?;
        Ok(true)
    }

    /// Copy a complete frame into a transmit buffer and submit it.
    pub fn send(&mut self, frame: &[u8]) -> Result<bool, FrameError> {
        let Some(pd) = self.alloc_tx(frame.len())? else {
            return Ok(false);
        };
        self.link.packet_content(&pd).copy_from_slice(frame);
        self.submit(pd)?;
        Ok(true)
    }

    /// Push submitted frames onto the wire and recycle completed buffers.
    pub fn flush(&mut self) -> Result<(), LinkError> {
        self.link.process_events()?;
        self.drain_acks();
        Ok(())
    }

    /// Drive the ARP retry timer.
    pub fn poll_timers(&mut self, now: Instant) -> Result<(), FrameError> {
        match self.arp.poll(now) {
            ArpAction::None => {}
            ArpAction::Resend => {
                tracing::debug!("ARP reply outstanding, resending request");
                self.send_arp_request(now)?;
            }
            ArpAction::GaveUp => {
                tracing::warn!(
                    peer = ?self.arp.target(),
                    "no ARP reply, falling back to broadcast"
                );
            }
        }
        Ok(())
    }

    fn send_arp_request(&mut self, now: Instant) -> Result<(), FrameError> {
        let Some(target) = self.arp.target() else {
            return Ok(());
        };
        let mac = self.link.mac_address();
        let src_ip = self.config.src_ip.unwrap_or(Ipv4Addr::UNSPECIFIED).octets();

        let mut frame = [0u8; ETH_LEN + ARP_LEN];
        let mut w = FrameWriter::new(&mut frame);
        w.put(&EthernetHeader::new(MacAddr::BROADCAST, mac, ETHERTYPE_ARP))?;
        w.put(&ArpPacket::request(mac, src_ip, target.octets()))?;

        if self.send(&frame)? {
            self.arp.request_sent(now);
            self.stats.arp_requests += 1;
            tracing::debug!(%target, "ARP request sent");
        }
        Ok(())
    }

    fn alloc_tx(&mut self, len: usize) -> Result<Option<PacketDescriptor>, LinkError> {
        self.drain_acks();
        for _ in 0..=MAX_ALLOC_RETRIES {
            match self.link.alloc_packet(len) {
                Ok(pd) => return Ok(Some(pd)),
                Err(LinkError::Exhausted) => {}
                Err(e) => return Err(e),
            }
            self.link.process_events()?;
            self.drain_acks();
        }
        self.stats.tx_dropped += 1;
        tracing::warn!(len, "transmit buffers exhausted, dropping frame");
        Ok(None)
    }

    fn submit(&mut self, pd: PacketDescriptor) -> Result<(), LinkError> {
        if !self.link.ready_to_submit() {
            self.link.process_events()?;
        }
        self.link.submit_packet(pd)?;
        self.stats.tx_frames += 1;
        Ok(())
    }

    fn drain_acks(&mut self) {
        while self.link.ack_avail() {
            let Some(pd) = self.link.get_acked_packet() else {
                break;
            };
            self.link.release_packet(pd);
        }
    }
}

/// Everything needed to lay down the Ethernet/IPv4/UDP headers.
struct DatagramHeader {
    src_mac: MacAddr,
    dst_mac: MacAddr,
    src_ip: [u8; 4],
    dst_ip: [u8; 4],
    id: u16,
    dst_port: u16,
    udp_checksum: bool,
}

impl DatagramHeader {
    fn write<F>(&self, buf: &mut [u8], fill: F) -> Result<usize, GuardExceeded>
    where
        F: FnOnce(&mut FrameWriter<'_>) -> Result<(), GuardExceeded>,
    {
        let mut w = FrameWriter::new(&mut *buf);
        w.put(&EthernetHeader::new(self.dst_mac, self.src_mac, ETHERTYPE_IPV4))?;
        let ip_range = w.reserve(IPV4_LEN)?;
        let udp_range = w.reserve(UDP_LEN)?;
        fill(&mut w)?;
        let end = w.position();

        // Frames never exceed PACKET_BUFFER_SIZE, so lengths fit in u16.
        let udp_len = (end - udp_range.start) as u16;
        let udp = UdpHeader {
            src_port: U16::new(SRC_UDP_PORT),
            dst_port: U16::new(self.dst_port),
            length: U16::new(udp_len),
            checksum: U16::new(0),
        };
        buf[udp_range.clone()].copy_from_slice(udp.as_bytes());
        if self.udp_checksum {
            let c = udp_checksum_ipv4(&self.src_ip, &self.dst_ip, &buf[udp_range.start..end]);
            buf[udp_range.start + 6..udp_range.start + 8].copy_from_slice(&c.to_be_bytes());
        }

        let mut ip = Ipv4Header {
            version_ihl: 0x45,
            dscp_ecn: 0,
            total_length: U16::new((end - ip_range.start) as u16),
            identification: U16::new(self.id),
            flags_fragment: U16::new(0x4000),
            ttl: DEFAULT_TTL,
            protocol: IPPROTO_UDP,
            checksum: U16::new(0),
            src: self.src_ip,
            dst: self.dst_ip,
        };
        ip.checksum = U16::new(ipv4_header_checksum(ip.as_bytes()));
        buf[ip_range].copy_from_slice(ip.as_bytes());
        Ok(end)
    }
}
