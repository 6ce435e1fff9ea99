//! Peer MAC resolution.
//!
//! The resolver only tracks the one configured peer. Requests are retried at
//! a fixed interval; after `max_retries` unanswered requests it gives up and
//! frames go to the broadcast MAC until the next outbound datagram restarts
//! resolution.

use remrom_core::MacAddr;
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpState {
    Idle,
    AwaitingReply { attempts: u32, last_sent: Instant },
    Resolved(MacAddr),
}

/// What the caller should do after `poll`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArpAction {
    None,
    /// Send another request.
    Resend,
    /// Retries exhausted; resolver is back to Idle.
    GaveUp,
}

#[derive(Debug, Clone)]
pub struct ArpResolver {
    target: Option<Ipv4Addr>,
    state: ArpState,
    retry_interval: Duration,
    max_retries: u32,
}

impl ArpResolver {
    /// `target` = None disables resolution; everything goes to broadcast.
    pub fn new(target: Option<Ipv4Addr>, retry_interval: Duration, max_retries: u32) -> Self {
        Self {
            target,
            state: ArpState::Idle,
            retry_interval,
            max_retries: max_retries.max(1),
        }
    }

    /// Start resolved with a statically configured MAC.
    pub fn with_static(mut self, mac: MacAddr) -> Self {
        self.state = ArpState::Resolved(mac);
        self
    }

    pub fn state(&self) -> ArpState {
        self.state
    }

    pub fn target(&self) -> Option<Ipv4Addr> {
        self.target
    }

    /// Destination MAC for outbound frames.
    pub fn peer_mac(&self) -> MacAddr {
        match self.state {
            ArpState::Resolved(mac) => mac,
            _ => MacAddr::BROADCAST,
        }
    }

    /// True when an outbound datagram should be preceded by a request.
    pub fn needs_request(&self) -> bool {
        self.target.is_some() && self.state == ArpState::Idle
    }

    pub fn request_sent(&mut self, now: Instant) {
        let attempts = match self.state {
            ArpState::AwaitingReply { attempts, .. } => attempts + 1,
            ArpState::Idle => 1,
            ArpState::Resolved(_) => return,
        };
        self.state = ArpState::AwaitingReply {
            attempts,
            last_sent: now,
        };
    }

    /// Advance the retry timer.
    pub fn poll(&mut self, now: Instant) -> ArpAction {
        let ArpState::AwaitingReply {
            attempts,
            last_sent,
        } = self.state
        else {
            return ArpAction::None;
        };
        if now.saturating_duration_since(last_sent) < self.retry_interval {
            return ArpAction::None;
        }
        if attempts >= self.max_retries {
            self.state = ArpState::Idle;
            return ArpAction::GaveUp;
        }
        ArpAction::Resend
    }

    /// ARP reply from `ip`. Accepted only while awaiting one from the target.
    pub fn handle_reply(&mut self, ip: Ipv4Addr, mac: MacAddr) -> bool {
        if !matches!(self.state, ArpState::AwaitingReply { .. }) || Some(ip) != self.target {
            return false;
        }
        self.state = ArpState::Resolved(mac);
        true
    }

    /// Learn the peer MAC from any frame the peer sent us.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr) -> bool {
        if matches!(self.state, ArpState::Resolved(_))
            || Some(ip) != self.target
            || mac.is_broadcast()
            || mac == MacAddr::ZERO
        {
            return false;
        }
        self.state = ArpState::Resolved(mac);
        true
    }
}
