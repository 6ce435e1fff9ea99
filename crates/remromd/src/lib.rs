//! remromd — raw-link transport, framing and the ROM replication backends.
//!
//! The binary wires these to configuration; the library half exists so the
//! same backends can be driven over an in-memory link in tests.

pub mod backend;
pub mod link;

pub use backend::{RomClient, RomServer};
pub use link::framer::{Framer, FramerConfig};
