//! Configuration system for remrom.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $REMROM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/remrom/config.toml
//!   3. ~/.config/remrom/config.toml

use crate::packet::ModuleName;
use crate::wire::{MacAddr, DEFAULT_UDP_PORT};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest content a client accepts unless configured otherwise (16 MiB).
pub const DEFAULT_MAX_CONTENT_SIZE: u32 = 16 * 1024 * 1024;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemromConfig {
    pub network: NetworkConfig,
    pub arp: ArpConfig,
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub modules: Vec<ModuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface for the raw link.
    pub interface: String,
    /// Local IPv4 address. Unset = accept every IPv4 destination.
    pub src: Option<Ipv4Addr>,
    /// Peer IPv4 address. Unset = send to the limited broadcast address.
    pub dst: Option<Ipv4Addr>,
    /// Static peer MAC. Unset = resolve via ARP.
    pub dst_mac: Option<String>,
    /// UDP port the protocol runs on.
    pub udp_port: u16,
    /// Leave the UDP checksum to the NIC.
    pub chksum_offload: bool,
    /// Number of transmit buffers.
    pub queue_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArpConfig {
    /// Interval between ARP requests while awaiting a reply.
    pub retry_interval_ms: u64,
    /// Requests sent before resolution is abandoned.
    pub max_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// How often ROM source files are checked for changes.
    pub poll_interval_ms: u64,
    /// Re-send SIGNAL for every module at this interval. 0 = never.
    pub resignal_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Send an UPDATE for every module at startup instead of waiting for SIGNAL.
    pub request_on_startup: bool,
    /// DATA announcing a larger content is dropped before any buffer is sized.
    pub max_content_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub name: String,
    /// Server: file the content is read from. Client: file the content is exported to.
    pub path: Option<PathBuf>,
    /// Treat content as an opaque blob. Otherwise it ends at the first NUL.
    pub binary: bool,
    /// Content used until real content is available.
    pub default: Option<String>,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            src: None,
            dst: None,
            dst_mac: None,
            udp_port: DEFAULT_UDP_PORT,
            chksum_offload: false,
            queue_size: 64,
        }
    }
}

impl Default for ArpConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 1000,
            max_retries: 5,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            resignal_interval_secs: 0,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_on_startup: false,
            max_content_size: DEFAULT_MAX_CONTENT_SIZE,
        }
    }
}

// ── Accessors ─────────────────────────────────────────────────────────────────

impl NetworkConfig {
    /// Parsed static peer MAC, if configured.
    pub fn peer_mac(&self) -> Result<Option<MacAddr>, ConfigError> {
        self.dst_mac
            .as_deref()
            .map(|s| s.parse().map_err(|_| ConfigError::Invalid(format!("dst_mac {s:?}"))))
            .transpose()
    }
}

impl ArpConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn resignal_interval(&self) -> Option<Duration> {
        (self.resignal_interval_secs > 0).then(|| Duration::from_secs(self.resignal_interval_secs))
    }
}

impl ModuleConfig {
    pub fn module_name(&self) -> Result<ModuleName, ConfigError> {
        ModuleName::new(self.name.as_str())
            .map_err(|_| ConfigError::Invalid(format!("module name {:?}", self.name)))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("remrom")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl RemromConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::file_path())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or defaults when it does not exist. No env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(RemromConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("REMROM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_to(&path)?;
        Ok(path)
    }

    fn write_default_to(path: &Path) -> Result<(), ConfigError> {
        if path.exists() {
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text =
            toml::to_string_pretty(&RemromConfig::default()).map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))
    }

    /// Reject configurations the daemon cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.network.udp_port == 0 {
            return Err(ConfigError::Invalid("udp_port must be non-zero".into()));
        }
        if self.network.queue_size == 0 {
            return Err(ConfigError::Invalid("queue_size must be non-zero".into()));
        }
        if self.arp.max_retries == 0 {
            return Err(ConfigError::Invalid("arp.max_retries must be non-zero".into()));
        }
        if self.arp.retry_interval_ms == 0 || self.server.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("timer intervals must be non-zero".into()));
        }
        if self.client.max_content_size == 0 {
            return Err(ConfigError::Invalid("client.max_content_size must be non-zero".into()));
        }
        self.network.peer_mac()?;

        let mut seen = HashSet::new();
        for module in &self.modules {
            let name = module.module_name()?;
            if !seen.insert(name) {
                return Err(ConfigError::Invalid(format!(
                    "module {:?} configured twice",
                    module.name
                )));
            }
        }
        Ok(())
    }

    /// Apply REMROM_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let flag = |v: String| v == "true" || v == "1";

        if let Some(v) = var("REMROM_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Some(v) = var("REMROM_NETWORK__SRC") {
            if let Ok(ip) = v.parse() {
                self.network.src = Some(ip);
            }
        }
        if let Some(v) = var("REMROM_NETWORK__DST") {
            if let Ok(ip) = v.parse() {
                self.network.dst = Some(ip);
            }
        }
        if let Some(v) = var("REMROM_NETWORK__DST_MAC") {
            self.network.dst_mac = Some(v);
        }
        if let Some(v) = var("REMROM_NETWORK__UDP_PORT") {
            if let Ok(p) = v.parse() {
                self.network.udp_port = p;
            }
        }
        if let Some(v) = var("REMROM_NETWORK__CHKSUM_OFFLOAD") {
            self.network.chksum_offload = flag(v);
        }
        if let Some(v) = var("REMROM_SERVER__RESIGNAL_INTERVAL_SECS") {
            if let Ok(s) = v.parse() {
                self.server.resignal_interval_secs = s;
            }
        }
        if let Some(v) = var("REMROM_CLIENT__REQUEST_ON_STARTUP") {
            self.client.request_on_startup = flag(v);
        }
        if let Some(v) = var("REMROM_CLIENT__MAX_CONTENT_SIZE") {
            if let Ok(n) = v.parse() {
                self.client.max_content_size = n;
            }
        }
    }
}
