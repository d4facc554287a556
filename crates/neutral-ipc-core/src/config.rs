//! Centralized configuration for Neutral IPC.
//!
//! Protocol tunables live on `IpcConfig` as associated constants. Runtime
//! settings for a server process live on `ServerConfig`, which is read once
//! at startup and passed by reference into the accept loop.

use crate::{NeutralError, Result};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Protocol-level configuration.
pub struct IpcConfig;

impl IpcConfig {
    pub const DEFAULT_HOST: &'static str = "127.0.0.1";
    pub const DEFAULT_PORT: u16 = 4273;
    pub const CONFIG_FILE: &'static str = "/etc/neutral-ipc-cfg.json";

    /// Largest single content block accepted from a peer (64MB).
    pub const MAX_FRAME_SIZE: usize = 67_108_864;
    pub const MAX_WORKERS: usize = 64;
    pub const MAX_QUEUED: usize = 256;

    pub const READ_TIMEOUT: Duration = Duration::from_secs(60);
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(2);
    pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(120);

    pub const DEFAULT_CACHE_PREFIX: &'static str = "neutral-cache";
}

/// Which cache store the server builds at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    #[default]
    Memory,
    Sqlite,
    None,
}

/// Cache store settings. Eviction is the store's concern, so it is
/// configured here and not in the request schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub backend: CacheBackendKind,
    /// Database file for the sqlite backend.
    pub path: Option<PathBuf>,
    /// Entry lifetime in seconds. `None` keeps entries until evicted.
    pub ttl_secs: Option<u64>,
    /// Capacity of the memory backend.
    pub max_entries: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            path: None,
            ttl_secs: None,
            max_entries: Some(10_000),
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// Runtime configuration of a render server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    #[serde(deserialize_with = "deserialize_port")]
    pub port: u16,
    pub max_workers: usize,
    pub max_queued: usize,
    pub max_frame_size: usize,
    pub read_timeout_secs: u64,
    /// Root directory for path template references.
    pub template_root: PathBuf,
    pub cache: CacheSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpcConfig::DEFAULT_HOST.to_string(),
            port: IpcConfig::DEFAULT_PORT,
            max_workers: IpcConfig::MAX_WORKERS,
            max_queued: IpcConfig::MAX_QUEUED,
            max_frame_size: IpcConfig::MAX_FRAME_SIZE,
            read_timeout_secs: IpcConfig::READ_TIMEOUT.as_secs(),
            template_root: PathBuf::from("."),
            cache: CacheSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: ServerConfig = serde_json::from_str(json).map_err(|e| NeutralError::Config {
            message: format!("Invalid server configuration: {}", e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).map_err(|e| NeutralError::io_with_path(e, path))?;
        Self::from_json(&contents)
    }

    /// Read a configuration file, falling back to defaults when it is
    /// missing or invalid.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Could not load config from {}, using defaults: {}",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(NeutralError::Config {
                message: "max_workers must be at least 1".to_string(),
            });
        }
        if self.read_timeout_secs == 0 {
            return Err(NeutralError::Config {
                message: "read_timeout_secs must be at least 1".to_string(),
            });
        }
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(NeutralError::Config {
                message: format!(
                    "max_frame_size must be between 1 and {}",
                    u32::MAX
                ),
            });
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }
}

/// Older config files carry the port as a string.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<u16, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Number(u16),
        Text(String),
    }

    match Port::deserialize(deserializer)? {
        Port::Number(port) => Ok(port),
        Port::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}
