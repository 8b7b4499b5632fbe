//! pulsegrid.toml configuration parser.
//!
//! Every duration is in seconds. Defaults reflect a fleet heartbeating
//! every 10 seconds with a 1-second listener flush cadence.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::Codec;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// The complete recognized configuration set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Expected inter-heartbeat interval from each host.
    pub heartbeat_period: u64,
    /// Host-presence TTL; typically a small multiple of the period.
    pub heartbeat_ttl: u64,
    /// TTL of the actual-freshness marker.
    pub actual_freshness_ttl: u64,
    /// Minimum age of the actual-freshness marker before the actual
    /// side is considered trustworthy.
    pub actual_warmup: u64,
    /// TTL of the desired-freshness marker.
    pub desired_freshness_ttl: u64,
    /// TTL of each desired-app record.
    pub desired_state_ttl: u64,
    /// Delay before duplicate-instance stops are emitted.
    pub grace_period: u64,
    /// Listener batch-flush cadence.
    pub flush_interval: u64,
    /// Read-cache full-rebuild cadence.
    pub cache_reload_interval: u64,
    /// Deadline applied to every KV operation.
    pub kv_timeout: u64,
    /// Root prefix in the KV store.
    pub kv_root: String,
    /// Stored-value form for instance heartbeats.
    pub codec: Codec,
    /// Batch writes per flush instead of writing per message.
    pub batched_saves: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_period: 10,
            heartbeat_ttl: 30,
            actual_freshness_ttl: 30,
            actual_warmup: 30,
            desired_freshness_ttl: 120,
            desired_state_ttl: 600,
            grace_period: 30,
            flush_interval: 1,
            cache_reload_interval: 20,
            kv_timeout: 3,
            kv_root: "/pulsegrid/v1".to_string(),
            codec: Codec::Compact,
            batched_saves: true,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval)
    }

    pub fn kv_timeout(&self) -> Duration {
        Duration::from_secs(self.kv_timeout)
    }

    /// Cadence of the store-usage measurement loop.
    pub fn usage_measure_interval(&self) -> Duration {
        Duration::from_secs(3 * self.heartbeat_period)
    }
}
