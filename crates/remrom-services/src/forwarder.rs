//! Producer-side content holder.

use bytes::Bytes;
use remrom_core::config::{ConfigError, ModuleConfig};
use remrom_core::{content_hash, ContentHash, ModuleName};
use std::cell::RefCell;
use std::rc::Rc;

use crate::rom::Forwarder;

/// Content for one module, shared between the backend registry and whoever
/// feeds it new content. Clones refer to the same content.
#[derive(Clone)]
pub struct RomForwarder {
    name: ModuleName,
    inner: Rc<RefCell<Inner>>,
}

struct Inner {
    binary: bool,
    default: Option<Bytes>,
    live: Option<Bytes>,
    /// What is actually transferred: live or default, NUL-trimmed in text mode.
    effective: Bytes,
    hash: ContentHash,
}

impl Inner {
    fn recompute(&mut self) {
        let source = self
            .live
            .as_ref()
            .or(self.default.as_ref())
            .cloned()
            .unwrap_or_default();
        self.effective = if self.binary {
            source
        } else {
            let end = source.iter().position(|&b| b == 0).unwrap_or(source.len());
            source.slice(..end)
        };
        self.hash = content_hash(&self.effective);
    }
}

impl RomForwarder {
    /// `binary` = false treats content as a string ending at the first NUL.
    pub fn new(name: ModuleName, binary: bool, default: Option<Bytes>) -> Self {
        let mut inner = Inner {
            binary,
            default,
            live: None,
            effective: Bytes::new(),
            hash: [0; 32],
        };
        inner.recompute();
        Self {
            name,
            inner: Rc::new(RefCell::new(inner)),
        }
    }

    pub fn from_config(config: &ModuleConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            config.module_name()?,
            config.binary,
            config.default.clone().map(Bytes::from),
        ))
    }

    /// Replace the live content. Returns false if nothing changed.
    pub fn update_content(&self, content: Bytes) -> bool {
        let mut inner = self.inner.borrow_mut();
        let before = inner.hash;
        inner.live = Some(content);
        inner.recompute();
        before != inner.hash
    }

    /// Drop the live content and fall back to the default payload.
    pub fn clear_content(&self) -> bool {
        let mut inner = self.inner.borrow_mut();
        if inner.live.take().is_none() {
            return false;
        }
        let before = inner.hash;
        inner.recompute();
        before != inner.hash
    }

    /// The bytes a transfer would carry now.
    pub fn content(&self) -> Bytes {
        self.inner.borrow().effective.clone()
    }
}

impl Forwarder for RomForwarder {
    fn module_name(&self) -> &ModuleName {
        &self.name
    }

    fn content_size(&self) -> usize {
        self.inner.borrow().effective.len()
    }

    fn content_hash(&self) -> ContentHash {
        self.inner.borrow().hash
    }

    fn transfer_content(&self, dst: &mut [u8], offset: usize) -> usize {
        let inner = self.inner.borrow();
        let Some(src) = inner.effective.get(offset..) else {
            return 0;
        };
        let len = src.len().min(dst.len());
        dst[..len].copy_from_slice(&src[..len]);
        len
    }
}
