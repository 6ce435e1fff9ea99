//! Remote-ROM integration harness.
//!
//! A server and a client backend are connected through in-memory wires. The
//! harness moves frames between them and can drop or rewrite frames in
//! flight, so whole transfers run without a real interface.

use bytes::Bytes;
use std::net::Ipv4Addr;
use std::rc::Rc;

use remrom_core::{MacAddr, ModuleName};
use remrom_services::{
    BackendClient, BackendServer, RomForwarder, RomModule, RomSession, SessionRoot, SignalCounter,
};
use remromd::link::{MemoryLink, Wire};
use remromd::{Framer, FramerConfig, RomClient, RomServer};

mod faults;
mod replication;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const SERVER_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x01]);
pub const CLIENT_MAC: MacAddr = MacAddr([0x02, 0, 0, 0, 0, 0x02]);
pub const SERVER_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
pub const CLIENT_IP: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// Addressing for both ends.
#[derive(Clone, Copy)]
pub enum Addressing {
    /// Unicast IPv4, peer MAC resolved over ARP.
    Unicast,
    /// No addresses configured: broadcast in both directions.
    Broadcast,
}

pub struct Link {
    pub server: RomServer<MemoryLink>,
    pub client: RomClient<MemoryLink>,
    server_out: Wire,
    server_in: Wire,
    client_out: Wire,
    client_in: Wire,
}

fn framer_config(addressing: Addressing, local: Ipv4Addr, peer: Ipv4Addr) -> FramerConfig {
    match addressing {
        Addressing::Unicast => FramerConfig {
            src_ip: Some(local),
            dst_ip: Some(peer),
            ..FramerConfig::default()
        },
        Addressing::Broadcast => FramerConfig::default(),
    }
}

impl Link {
    pub fn new(addressing: Addressing) -> Self {
        Self::with_server_config(
            addressing,
            framer_config(addressing, SERVER_IP, CLIENT_IP),
        )
    }

    pub fn with_server_config(addressing: Addressing, server_config: FramerConfig) -> Self {
        let (server_out, server_in) = (Wire::new(), Wire::new());
        let (client_out, client_in) = (Wire::new(), Wire::new());
        let server = RomServer::new(Framer::new(
            MemoryLink::new(SERVER_MAC, 8, server_out.clone(), server_in.clone()),
            server_config,
        ));
        let client = RomClient::new(Framer::new(
            MemoryLink::new(CLIENT_MAC, 8, client_out.clone(), client_in.clone()),
            framer_config(addressing, CLIENT_IP, SERVER_IP),
        ));
        Self {
            server,
            client,
            server_out,
            server_in,
            client_out,
            client_in,
        }
    }

    /// Client that drops content announced as larger than `limit`.
    pub fn with_client_limit(mut self, limit: u32) -> Self {
        self.client = self.client.with_max_content_size(limit);
        self
    }

    /// Move frames until both directions are quiet.
    pub fn pump(&mut self) {
        self.pump_with(|_| Some(()));
    }

    /// Like `pump`, but every server→client frame passes through `tamper`,
    /// which may rewrite it or return None to drop it.
    pub fn pump_with<F>(&mut self, mut tamper: F)
    where
        F: FnMut(&mut Vec<u8>) -> Option<()>,
    {
        for _ in 0..64 {
            if self.server_out.is_empty() && self.client_out.is_empty() {
                return;
            }
            for mut frame in self.server_out.drain() {
                if tamper(&mut frame).is_some() {
                    self.client_in.push(frame);
                }
            }
            self.client.poll_link().unwrap();
            for frame in self.client_out.drain() {
                self.server_in.push(frame);
            }
            self.server.poll_link().unwrap();
        }
        panic!("link never went quiet");
    }
}

/// Server side of one module.
pub fn serve(link: &mut Link, name: &str, content: &[u8]) -> RomForwarder {
    let forwarder = RomForwarder::new(ModuleName::new(name).unwrap(), true, None);
    forwarder.update_content(Bytes::copy_from_slice(content));
    link.server.register_forwarder(Box::new(forwarder.clone()));
    forwarder
}

/// Client side of one module with one attached session.
pub struct Consumer {
    pub root: SessionRoot,
    pub session: RomSession,
    pub signal: Rc<SignalCounter>,
}

pub fn consume(link: &mut Link, name: &str, default: Option<&'static [u8]>) -> Consumer {
    let module = RomModule::new(ModuleName::new(name).unwrap(), default.map(Bytes::from_static));
    let root = module.root();
    link.client.register_receiver(Box::new(module));
    let session = root.create_session(name).unwrap();
    let signal = Rc::new(SignalCounter::new());
    session.sigh(signal.clone());
    Consumer {
        root,
        session,
        signal,
    }
}

pub fn module(name: &str) -> ModuleName {
    ModuleName::new(name).unwrap()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
