//! Linux `AF_PACKET` raw socket link.
//!
//! The socket is non-blocking. Submitted frames are written during
//! `process_events`; a full socket buffer leaves them queued for the next
//! call. Receive readiness is exposed through a shared `AsyncFd` so the
//! event loop can await it while the framer owns the link.

use anyhow::{Context, Result};
use remrom_core::MacAddr;
use std::io;
use std::mem::{self, MaybeUninit};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use tokio::io::unix::AsyncFd;

use super::{LinkError, LinkTransport, PacketDescriptor, TxPool};

pub struct PacketSocketLink {
    fd: Rc<AsyncFd<OwnedFd>>,
    send_addr: libc::sockaddr_ll,
    mac: MacAddr,
    pool: TxPool,
}

impl PacketSocketLink {
    /// Open a raw socket bound to `interface`. Must be called inside a tokio runtime.
    pub fn open(interface: &str, queue_size: usize) -> Result<Self> {
        let index = if_index(interface)?;
        let mac = interface_mac(interface)?;

        // SAFETY: plain socket(2) call, no Rust memory involved.
        let raw = unsafe {
            libc::socket(
                libc::AF_PACKET,
                libc::SOCK_RAW | libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                (libc::ETH_P_ALL as u16).to_be() as libc::c_int,
            )
        };
        if raw < 0 {
            return Err(io::Error::last_os_error()).context("failed to create AF_PACKET socket");
        }
        // SAFETY: raw is a freshly created descriptor owned by nobody else.
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
        let mut addr: libc::sockaddr_ll = unsafe { MaybeUninit::zeroed().assume_init() };
        addr.sll_family = libc::AF_PACKET as libc::c_ushort;
        addr.sll_protocol = (libc::ETH_P_ALL as u16).to_be();
        addr.sll_ifindex = index as libc::c_int;
        addr.sll_halen = 6;

        // SAFETY: addr lives across the call and the length matches its type.
        let err = unsafe {
            libc::bind(
                fd.as_raw_fd(),
                &addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if err < 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("failed to bind raw socket to {interface}"));
        }

        let fd = AsyncFd::new(fd).context("failed to register raw socket with runtime")?;
        tracing::info!(interface, index, %mac, "raw link open");
        Ok(Self {
            fd: Rc::new(fd),
            send_addr: addr,
            mac,
            pool: TxPool::new(queue_size),
        })
    }

    /// Handle for awaiting receive readiness.
    pub fn readiness(&self) -> Rc<AsyncFd<OwnedFd>> {
        self.fd.clone()
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }

    fn send(&self, frame: &[u8]) -> io::Result<usize> {
        // SAFETY: frame and send_addr are borrowed for the duration of the call.
        let n = unsafe {
            libc::sendto(
                self.raw_fd(),
                frame.as_ptr() as *const libc::c_void,
                frame.len(),
                0,
                &self.send_addr as *const libc::sockaddr_ll as *const libc::sockaddr,
                mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t,
            )
        };
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}

impl LinkTransport for PacketSocketLink {
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
        while let Some(frame) = self.pool.front_submitted() {
            match self.send(frame) {
                Ok(_) => self.pool.complete_front(),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    // Drop the frame rather than wedging the queue.
                    tracing::warn!(error = %e, "raw send failed, dropping frame");
                    self.pool.complete_front();
                }
            }
        }
        Ok(())
    }

    fn recv_frame(&mut self, buf: &mut [u8]) -> Result<Option<usize>, LinkError> {
        loop {
            // SAFETY: sockaddr_ll is plain old data; all-zero is a valid value.
            let mut from: libc::sockaddr_ll = unsafe { MaybeUninit::zeroed().assume_init() };
            let mut from_len = mem::size_of::<libc::sockaddr_ll>() as libc::socklen_t;
            // SAFETY: buf and from are valid for writes of the lengths passed.
            let n = unsafe {
                libc::recvfrom(
                    self.raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                    0,
                    &mut from as *mut libc::sockaddr_ll as *mut libc::sockaddr,
                    &mut from_len,
                )
            };
            if n < 0 {
                let e = io::Error::last_os_error();
                return match e.kind() {
                    io::ErrorKind::WouldBlock => Ok(None),
                    io::ErrorKind::Interrupted => continue,
                    _ => Err(LinkError::Io(e)),
                };
            }
            // Our own transmissions are looped back to packet sockets.
            if from.sll_pkttype == libc::PACKET_OUTGOING as u8 {
                continue;
            }
            return Ok(Some(n as usize));
        }
    }
}

// ── Interface helpers ────────────────────────────────────────────────────────

/// Look up an interface index by name.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    // SAFETY: name_cstr is a valid NUL-terminated string for the call.
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}

/// Hardware address of an interface, from sysfs.
pub fn interface_mac(name: &str) -> Result<MacAddr> {
    let path = format!("/sys/class/net/{name}/address");
    let text = std::fs::read_to_string(&path).with_context(|| format!("failed to read {path}"))?;
    text.trim()
        .parse()
        .with_context(|| format!("unexpected MAC address in {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_interface_is_error() {
        assert!(if_index("remrom-does-not-exist0").is_err());
        assert!(if_index("bad\0name").is_err());
        assert!(interface_mac("remrom-does-not-exist0").is_err());
    }
}
