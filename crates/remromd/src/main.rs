//! remromd — Remote-ROM replication daemon.
//!
//! `remromd server` serves the configured modules from local files,
//! `remromd client` receives them and exports verified content.

use anyhow::{bail, Context, Result};
use tokio::sync::broadcast;

use remrom_core::config::RemromConfig;
use remromd::link::PacketSocketLink;
use remromd::{Framer, FramerConfig};

mod consumer;
mod producer;

#[derive(Debug, Clone, Copy)]
enum Role {
    Server,
    Client,
}

fn role() -> Result<Role> {
    match std::env::args().nth(1).as_deref() {
        Some("server") => Ok(Role::Server),
        Some("client") => Ok(Role::Client),
        Some(other) => bail!("unknown role {other:?}, expected \"server\" or \"client\""),
        None => bail!("usage: remromd <server|client>"),
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let role = role()?;

    match RemromConfig::write_default_if_missing() {
        Ok(path) => tracing::debug!(path = %path.display(), "config file"),
        Err(e) => tracing::warn!(error = %e, "failed to write default config"),
    }
    let config = RemromConfig::load().context("failed to load config")?;

    if config.network.interface.is_empty() {
        bail!("network.interface is not set (config file or REMROM_NETWORK__INTERFACE)");
    }
    if config.modules.is_empty() {
        tracing::warn!("no modules configured");
    }
    tracing::info!(
        ?role,
        interface = %config.network.interface,
        src = ?config.network.src,
        dst = ?config.network.dst,
        port = config.network.udp_port,
        modules = config.modules.len(),
        "remromd starting"
    );

    let link = PacketSocketLink::open(&config.network.interface, config.network.queue_size)?;
    let readiness = link.readiness();
    let framer = Framer::new(link, FramerConfig::from_config(&config)?);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    let result = match role {
        Role::Server => {
            producer::run(&config, framer, readiness, shutdown_tx.subscribe()).await
        }
        Role::Client => {
            consumer::run(&config, framer, readiness, shutdown_tx.subscribe()).await
        }
    };
    tracing::info!("remromd stopped");
    result
}
