//! Node configuration file (`colonylink.json`).
//!
//! Read once when a session starts. Every section and field has a default,
//! so a partial file is fine and unknown fields are ignored. A missing file
//! is created with the defaults written out in full.

use std::path::{Path, PathBuf};
use std::time::Duration;

use colonylink_session::CompatPolicy;
use colonylink_tick::TickConfig;
use colonylink_transfer::{CHUNK_HEADER_RESERVE, MIN_CHUNK_SIZE_KB, TransferConfig};
use serde::{Deserialize, Serialize};

/// Default file name, next to the working directory of the process.
pub const CONFIG_FILE_NAME: &str = "colonylink.json";

/// Errors from loading or saving the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSettings {
    /// Lobby capacity including the host.
    pub max_lobby_size: usize,
    /// Transport events handled per tick while hosting.
    pub max_messages_per_poll: usize,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            max_lobby_size: 4,
            max_messages_per_poll: 128,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSettings {
    pub max_messages_per_poll: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            max_messages_per_poll: 16,
        }
    }
}

/// Per-class ceilings on an encoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeLimits {
    pub reliable_max_bytes: usize,
    pub unreliable_max_bytes: usize,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            reliable_max_bytes: 512 * 1024,
            unreliable_max_bytes: 1200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// When off, every manifest offer is approved unchecked.
    pub verification_enabled: bool,
    pub strict_mode: bool,
    pub allow_version_mismatch: bool,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            verification_enabled: true,
            strict_mode: false,
            allow_version_mismatch: false,
        }
    }
}

impl AdmissionConfig {
    pub fn policy(&self) -> CompatPolicy {
        CompatPolicy {
            strict: self.strict_mode,
            allow_version_mismatch: self.allow_version_mismatch,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub world_update_interval_ms: u64,
    /// Cap on cell updates per `WorldUpdateBatch`, below what the
    /// unreliable ceiling would allow.
    pub max_updates_per_packet: usize,
    pub instantiation_interval_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            world_update_interval_ms: 10_000,
            max_updates_per_packet: 180,
            instantiation_interval_ms: 2_000,
        }
    }
}

impl BatchConfig {
    pub fn world_update_interval(&self) -> Duration {
        Duration::from_millis(self.world_update_interval_ms)
    }

    pub fn instantiation_interval(&self) -> Duration {
        Duration::from_millis(self.instantiation_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickSettings {
    pub rate_hz: u32,
}

impl Default for TickSettings {
    fn default() -> Self {
        Self { rate_hz: 30 }
    }
}

impl TickSettings {
    pub fn scheduler_config(&self) -> TickConfig {
        TickConfig::with_rate(self.rate_hz)
    }
}

// ---------------------------------------------------------------------------
// NodeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: HostSettings,
    pub client: ClientSettings,
    pub transfer: TransferConfig,
    pub limits: SizeLimits,
    pub admission: AdmissionConfig,
    pub batching: BatchConfig,
    pub tick: TickSettings,
}

impl NodeConfig {
    /// Loads `path`, or writes the defaults there when it does not exist.
    pub fn load_or_create(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            let config: Self =
                serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?;
            tracing::info!(path = %path.display(), "configuration loaded");
            Ok(config.validated())
        } else {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            Ok(config)
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Clamps values that would stall or break the node.
    pub fn validated(mut self) -> Self {
        let min_reliable = MIN_CHUNK_SIZE_KB * 1024 + CHUNK_HEADER_RESERVE;
        if self.limits.reliable_max_bytes < min_reliable {
            tracing::warn!(
                configured = self.limits.reliable_max_bytes,
                min = min_reliable,
                "reliable ceiling cannot carry the smallest chunk, raising"
            );
            self.limits.reliable_max_bytes = min_reliable;
        }
        self.transfer = self
            .transfer
            .validated()
            .fit_to(self.limits.reliable_max_bytes);
        if self.host.max_messages_per_poll == 0 {
            tracing::warn!("host.max_messages_per_poll is 0, using 1");
            self.host.max_messages_per_poll = 1;
        }
        if self.client.max_messages_per_poll == 0 {
            tracing::warn!("client.max_messages_per_poll is 0, using 1");
            self.client.max_messages_per_poll = 1;
        }
        if self.host.max_lobby_size < 2 {
            tracing::warn!(configured = self.host.max_lobby_size, "max_lobby_size below 2, using 2");
            self.host.max_lobby_size = 2;
        }
        if self.limits.unreliable_max_bytes > self.limits.reliable_max_bytes {
            tracing::warn!(
                unreliable = self.limits.unreliable_max_bytes,
                reliable = self.limits.reliable_max_bytes,
                "unreliable ceiling above reliable ceiling, clamping"
            );
            self.limits.unreliable_max_bytes = self.limits.reliable_max_bytes;
        }
        if self.batching.max_updates_per_packet == 0 {
            tracing::warn!("batching.max_updates_per_packet is 0, using 1");
            self.batching.max_updates_per_packet = 1;
        }
        self
    }
}
