//! Consumer-side double-buffered ROM module.
//!
//! The background buffer belongs to the module alone and is only written by
//! the backend through the `Receiver` trait. On a verified commit it is frozen
//! and handed to the session root as the new foreground; sessions never see
//! it while it is being filled.

use bytes::Bytes;
use remrom_core::checksum::short_hash;
use remrom_core::config::{ConfigError, ModuleConfig};
use remrom_core::{content_hash, ContentHash, ModuleName};

use crate::rom::{CommitOutcome, Receiver};
use crate::session::SessionRoot;

/// Reassembly state of a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Idle,
    Receiving,
    Committed,
    Rejected,
}

pub struct RomModule {
    root: SessionRoot,
    background: Vec<u8>,
    expected: ContentHash,
    state: ModuleState,
    commits: u64,
}

impl RomModule {
    pub fn new(name: ModuleName, default: Option<Bytes>) -> Self {
        Self {
            root: SessionRoot::new(name, default),
            background: Vec::new(),
            expected: [0; 32],
            state: ModuleState::Idle,
            commits: 0,
        }
    }

    pub fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.module_name()?,
            config.default.clone().map(Bytes::from),
        ))
    }

    /// Handle for attaching sessions. Stays valid after the module is
    /// registered with a backend.
    pub fn root(&self) -> SessionRoot {
        self.root.clone()
    }

    pub fn state(&self) -> ModuleState {
        self.state
    }

    /// Number of successful commits.
    pub fn commits(&self) -> u64 {
        self.commits
    }
}

impl Receiver for RomModule {
    fn module_name(&self) -> &ModuleName {
        self.root.module_name()
    }

    fn start_new_content(&mut self, len: usize, expected: ContentHash) -> &mut [u8] {
        if self.state == ModuleState::Receiving {
            tracing::debug!(
                module = %self.root.module_name(),
                "restarting transfer, discarding partial content"
            );
        }
        // Contents past the previous length are not meaningful; only the size matters.
        self.background.resize(len, 0);
        self.expected = expected;
        self.state = ModuleState::Receiving;
        &mut self.background
    }

    fn content_mut(&mut self, expected: &ContentHash) -> Option<&mut [u8]> {
        (self.state == ModuleState::Receiving && self.expected == *expected)
            .then_some(self.background.as_mut_slice())
    }

    fn commit_new_content(&mut self, abort: bool) -> CommitOutcome {
        if self.state != ModuleState::Receiving {
            return CommitOutcome::Idle;
        }
        let module = self.root.module_name().clone();

        if abort {
            self.background.clear();
            self.state = ModuleState::Idle;
            tracing::warn!(%module, "transfer aborted");
            return CommitOutcome::Aborted;
        }

        let actual = content_hash(&self.background);
        if actual != self.expected {
            self.state = ModuleState::Rejected;
            tracing::error!(
                %module,
                expected = %short_hash(&self.expected),
                actual = %short_hash(&actual),
                "content hash mismatch, keeping previous content"
            );
            return CommitOutcome::Rejected;
        }

        let content = Bytes::from(std::mem::take(&mut self.background));
        let size = content.len();
        self.root.publish(content);
        self.state = ModuleState::Committed;
        self.commits += 1;
        tracing::info!(%module, size, hash = %short_hash(&actual), "content committed");
        self.root.notify_clients();
        CommitOutcome::Committed
    }
}
