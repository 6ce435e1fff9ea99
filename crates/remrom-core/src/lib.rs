//! remrom-core — wire format, checked frame cursors, checksums and configuration.
//! All other remrom crates depend on this one.

pub mod checksum;
pub mod config;
pub mod guard;
pub mod packet;
pub mod wire;

pub use checksum::{content_hash, ContentHash};
pub use packet::{DataFragment, Message, MessageBody, ModuleName};
pub use wire::{MacAddr, PacketType};
