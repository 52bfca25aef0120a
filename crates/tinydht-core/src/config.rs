//! Configuration system for tinydht.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $TINYDHT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/tinydht/config.toml
//!   3. ~/.config/tinydht/config.toml

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{
    BROADCAST_INTERVAL_MS, DEFAULT_PORT, PEER_TTL_SECS, SEND_TIMEOUT_MS, VALUE_TTL_SECS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TinyDhtConfig {
    pub network: NetworkConfig,
    pub gossip: GossipConfig,
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind.
    pub bind_host: IpAddr,
    /// Preferred UDP port. Falls back to an OS-assigned port if taken.
    /// 0 = always OS-assigned.
    pub port: u16,
    /// Rendezvous node greeted at startup. None = act as the rendezvous.
    pub bootstrap: Option<SocketAddr>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Pause between two broadcast passes.
    pub broadcast_interval_ms: u64,
    /// Peers unseen for longer than this are pruned.
    pub peer_ttl_secs: u64,
    /// Lifetime of locally inserted values.
    pub value_ttl_secs: u64,
    /// Deadline for one outbound datagram.
    pub send_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Where the periodic JSON state export goes. None = no export.
    pub export_path: Option<PathBuf>,
    pub export_interval_secs: u64,
    /// Read lines from stdin and insert them as values.
    pub interactive: bool,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for TinyDhtConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            gossip: GossipConfig::default(),
            debug: DebugConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            bootstrap: Some(SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                DEFAULT_PORT,
            )),
        }
    }
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            broadcast_interval_ms: BROADCAST_INTERVAL_MS,
            peer_ttl_secs: PEER_TTL_SECS,
            value_ttl_secs: VALUE_TTL_SECS,
            send_timeout_ms: SEND_TIMEOUT_MS,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            export_path: Some(PathBuf::from("state.json")),
            export_interval_secs: 2,
            interactive: true,
        }
    }
}

impl GossipConfig {
    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms)
    }

    pub fn peer_ttl(&self) -> Duration {
        Duration::from_secs(self.peer_ttl_secs)
    }

    pub fn value_ttl(&self) -> Duration {
        Duration::from_secs(self.value_ttl_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("tinydht")
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
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl TinyDhtConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            TinyDhtConfig::default()
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("TINYDHT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&TinyDhtConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply TINYDHT_* overrides. `lookup` is `std::env::var` in production.
    /// Unparseable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("TINYDHT_NETWORK__BIND_HOST") {
            if let Ok(ip) = v.parse() {
                self.network.bind_host = ip;
            }
        }
        if let Some(v) = lookup("TINYDHT_NETWORK__PORT") {
            if let Ok(p) = v.parse() {
                self.network.port = p;
            }
        }
        if let Some(v) = lookup("TINYDHT_NETWORK__BOOTSTRAP") {
            if v.is_empty() {
                self.network.bootstrap = None;
            } else if let Ok(addr) = v.parse() {
                self.network.bootstrap = Some(addr);
            }
        }
        if let Some(v) = lookup("TINYDHT_GOSSIP__BROADCAST_INTERVAL_MS") {
            if let Ok(ms) = v.parse() {
                self.gossip.broadcast_interval_ms = ms;
            }
        }
        if let Some(v) = lookup("TINYDHT_GOSSIP__PEER_TTL_SECS") {
            if let Ok(s) = v.parse() {
                self.gossip.peer_ttl_secs = s;
            }
        }
        if let Some(v) = lookup("TINYDHT_DEBUG__EXPORT_PATH") {
            self.debug.export_path = if v.is_empty() {
                None
            } else {
                Some(PathBuf::from(v))
            };
        }
        if let Some(v) = lookup("TINYDHT_DEBUG__INTERACTIVE") {
            self.debug.interactive = v == "true" || v == "1";
        }
    }
}
