//! Client role: receive modules over the link and export each verified
//! content to its configured file.

use std::os::unix::io::OwnedFd;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::io::unix::AsyncFd;
use tokio::sync::{broadcast, Notify};

use remrom_core::config::RemromConfig;
use remrom_core::{content_hash, ContentHash, ModuleName};
use remrom_services::{BackendClient, RomModule, RomSession};
use remromd::link::PacketSocketLink;
use remromd::{Framer, RomClient};

/// A local consumer that mirrors one module into a file.
struct Export {
    session: RomSession,
    path: PathBuf,
    written: Option<ContentHash>,
}

impl Export {
    fn sync(&mut self) {
        let content = self.session.dataspace();
        let hash = content_hash(&content);
        if self.written == Some(hash) {
            return;
        }
        match write_atomic(&self.path, &content) {
            Ok(()) => {
                self.written = Some(hash);
                tracing::info!(
                    module = %self.session.module_name(),
                    path = %self.path.display(),
                    size = content.len(),
                    "content exported"
                );
            }
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "export failed"),
        }
    }
}

/// Write to a temp file then rename, so readers never see a partial file.
fn write_atomic(path: &Path, content: &Bytes) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, content).with_context(|| format!("writing {}", tmp.display()))?;
    std::fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}

pub async fn run(
    config: &RemromConfig,
    framer: Framer<PacketSocketLink>,
    readiness: Rc<AsyncFd<OwnedFd>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut client = RomClient::new(framer).with_max_content_size(config.client.max_content_size);
    let notify = Rc::new(Notify::new());
    let mut exports = Vec::new();
    let mut names: Vec<ModuleName> = Vec::new();

    for module in &config.modules {
        let rom = RomModule::from_config(module)?;
        let root = rom.root();
        names.push(root.module_name().clone());
        client.register_receiver(Box::new(rom));

        let Some(path) = &module.path else {
            continue;
        };
        let session = root.create_session(&module.name)?;
        session.sigh(notify.clone());
        let mut export = Export {
            session,
            path: path.clone(),
            written: None,
        };
        if root.dataspace().is_empty() {
            tracing::debug!(module = %module.name, "no default content, nothing to export yet");
        } else {
            export.sync();
        }
        exports.push(export);
    }

    if config.client.request_on_startup {
        for name in &names {
            if let Err(e) = client.request_update(name) {
                tracing::warn!(module = %name, error = %e, "startup request failed");
            }
        }
    }

    let mut arp_timer = tokio::time::interval(config.arp.retry_interval());

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            guard = readiness.readable() => {
                let mut guard = guard?;
                guard.clear_ready();
                if let Err(e) = client.poll_link() {
                    tracing::warn!(error = %e, "link receive failed");
                }
            }

            _ = notify.notified() => {
                for export in &mut exports {
                    export.sync();
                }
            }

            _ = arp_timer.tick() => {
                let framer = client.framer_mut();
                if let Err(e) = framer.poll_timers(Instant::now()) {
                    tracing::warn!(error = %e, "ARP timer failed");
                }
                if let Err(e) = framer.flush() {
                    tracing::warn!(error = %e, "link flush failed");
                }
            }
        }
    }

    let stats = client.framer().stats();
    tracing::info!(
        rx = stats.rx_frames,
        delivered = stats.rx_delivered,
        dropped = stats.rx_dropped,
        "client stopped"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_write_replaces_file() {
        let dir = std::env::temp_dir().join(format!("remromd-export-{}", std::process::id()));
        let path = dir.join("config.rom");
        write_atomic(&path, &Bytes::from_static(b"one")).unwrap();
        write_atomic(&path, &Bytes::from_static(b"two")).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"two");
        assert!(!path.with_extension("tmp").exists());
        std::fs::remove_dir_all(&dir).ok();
    }
}
