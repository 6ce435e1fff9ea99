//! remrom-services — the ROM roles on either end of the link.
//!
//! `RomForwarder` serves content on the producer side, `RomModule`
//! reassembles and verifies it on the consumer side, and `SessionRoot`
//! fans the verified content out to local sessions.

pub mod forwarder;
pub mod module;
pub mod rom;
pub mod session;

pub use forwarder::RomForwarder;
pub use module::{ModuleState, RomModule};
pub use rom::{BackendClient, BackendServer, CommitOutcome, Forwarder, Receiver};
pub use session::{RomSession, SessionError, SessionRoot, Signal, SignalCounter};
