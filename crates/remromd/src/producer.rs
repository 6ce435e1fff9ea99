//! Server role: keep forwarders in sync with their source files and answer
//! the link.

use std::io;
use std::os::unix::io::OwnedFd;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::{Instant, SystemTime};

use anyhow::Result;
use bytes::Bytes;
use tokio::io::unix::AsyncFd;
use tokio::sync::broadcast;

use remrom_core::config::RemromConfig;
use remrom_services::{BackendServer, Forwarder, RomForwarder};
use remromd::link::PacketSocketLink;
use remromd::{Framer, RomServer};

/// A module's backing file and the stamp of the last version loaded.
struct SourceFile {
    path: PathBuf,
    forwarder: RomForwarder,
    stamp: Option<(SystemTime, u64)>,
}

impl SourceFile {
    /// Reload if the file changed. Returns true when the served content changed.
    fn refresh(&mut self) -> bool {
        let meta = match std::fs::metadata(&self.path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if self.stamp.take().is_some() {
                    tracing::info!(path = %self.path.display(), "source file removed");
                    return self.forwarder.clear_content();
                }
                return false;
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to stat source file");
                return false;
            }
        };
        let stamp = (meta.modified().unwrap_or(SystemTime::UNIX_EPOCH), meta.len());
        if self.stamp == Some(stamp) {
            return false;
        }
        match std::fs::read(&self.path) {
            Ok(content) => {
                self.stamp = Some(stamp);
                let changed = self.forwarder.update_content(Bytes::from(content));
                if changed {
                    tracing::info!(
                        module = %self.forwarder.module_name(),
                        size = self.forwarder.content_size(),
                        "content loaded"
                    );
                }
                changed
            }
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read source file");
                false
            }
        }
    }
}

pub async fn run(
    config: &RemromConfig,
    framer: Framer<PacketSocketLink>,
    readiness: Rc<AsyncFd<OwnedFd>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut server = RomServer::new(framer);
    let mut sources = Vec::new();

    for module in &config.modules {
        let forwarder = RomForwarder::from_config(module)?;
        server.register_forwarder(Box::new(forwarder.clone()));
        match &module.path {
            Some(path) => sources.push(SourceFile {
                path: path.clone(),
                forwarder,
                stamp: None,
            }),
            None => tracing::info!(module = %module.name, "no source file, serving default"),
        }
    }
    for source in &mut sources {
        source.refresh();
    }
    server.send_updates();

    let mut poll = tokio::time::interval(config.server.poll_interval());
    let mut arp_timer = tokio::time::interval(config.arp.retry_interval());
    let resignal_every = config.server.resignal_interval();
    let mut resignal =
        tokio::time::interval(resignal_every.unwrap_or(std::time::Duration::from_secs(3600)));
    // First tick of each interval fires immediately.
    resignal.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.recv() => break,

            guard = readiness.readable() => {
                let mut guard = guard?;
                guard.clear_ready();
                if let Err(e) = server.poll_link() {
                    tracing::warn!(error = %e, "link receive failed");
                }
            }

            _ = poll.tick() => {
                for source in &mut sources {
                    if source.refresh() {
                        let name = source.forwarder.module_name().clone();
                        server.send_update(&name);
                    }
                }
            }

            _ = arp_timer.tick() => {
                let framer = server.framer_mut();
                if let Err(e) = framer.poll_timers(Instant::now()) {
                    tracing::warn!(error = %e, "ARP timer failed");
                }
                if let Err(e) = framer.flush() {
                    tracing::warn!(error = %e, "link flush failed");
                }
            }

            _ = resignal.tick(), if resignal_every.is_some() => {
                tracing::debug!("periodic re-signal");
                server.send_updates();
            }
        }
    }

    let stats = server.framer().stats();
    tracing::info!(
        rx = stats.rx_frames,
        tx = stats.tx_frames,
        dropped = stats.rx_dropped + stats.tx_dropped,
        "server stopped"
    );
    Ok(())
}
