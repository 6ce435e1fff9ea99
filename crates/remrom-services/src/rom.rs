//! Role traits at the seam between the link backends and ROM content.
//!
//! Backends move packets; forwarders and receivers own content. Each backend
//! keeps a registry of them keyed by module name, so one process can serve
//! or mirror any number of modules.

use remrom_core::{ContentHash, ModuleName};

/// Producer-side content source for one module.
pub trait Forwarder {
    fn module_name(&self) -> &ModuleName;

    /// Size of the content as it would be transferred now.
    fn content_size(&self) -> usize;

    /// Hash of the content as it would be transferred now.
    fn content_hash(&self) -> ContentHash;

    /// Copy content starting at `offset` into `dst`. Returns bytes copied,
    /// which is less than `dst.len()` only at the end of the content.
    fn transfer_content(&self, dst: &mut [u8], offset: usize) -> usize;
}

/// Result of `Receiver::commit_new_content`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Content verified and now visible to sessions.
    Committed,
    /// Content failed verification; previous content stays visible.
    Rejected,
    /// Transfer discarded on request.
    Aborted,
    /// Nothing was in flight.
    Idle,
}

/// Consumer-side reassembly target for one module.
pub trait Receiver {
    fn module_name(&self) -> &ModuleName;

    /// Begin a transfer of `len` bytes whose content must hash to `expected`.
    /// Discards any transfer in flight. The returned buffer is not zeroed.
    fn start_new_content(&mut self, len: usize, expected: ContentHash) -> &mut [u8];

    /// Buffer of the transfer in flight, if it is the one for `expected`.
    fn content_mut(&mut self, expected: &ContentHash) -> Option<&mut [u8]>;

    /// Finish the transfer in flight: verify and publish, or discard if `abort`.
    fn commit_new_content(&mut self, abort: bool) -> CommitOutcome;
}

/// Producer backend surface.
pub trait BackendServer {
    /// Add a forwarder, replacing any registered under the same name.
    fn register_forwarder(&mut self, forwarder: Box<dyn Forwarder>);

    /// Announce that the module's content changed.
    fn send_update(&mut self, name: &ModuleName);
}

/// Consumer backend surface.
pub trait BackendClient {
    /// Add a receiver, replacing any registered under the same name.
    fn register_receiver(&mut self, receiver: Box<dyn Receiver>);
}
