// Copyright 2026 Gatekeeper Contributors
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use gatekeeper_core::ProfileConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Gatekeeper front-end configuration, loaded with priority: config file >
/// environment variables > defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatekeeperConfig {
    pub server: HttpServerConfig,
    #[serde(default)]
    pub sharding: ShardingConfig,
    #[serde(default)]
    pub tier2: Tier2Config,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub profile: ProfileConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_addr")]
    pub listen_addr: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,

    #[serde(default = "default_ingest_batch_max")]
    pub ingest_batch_max: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShardingConfig {
    /// Must be a power of two; default = number of logical CPUs rounded up.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,

    #[serde(default = "default_registry_capacity")]
    pub registry_capacity_per_shard: usize,

    #[serde(default = "default_idle_expire_secs")]
    pub idle_expire_secs: u64,

    #[serde(default = "default_inbound_channel_capacity")]
    pub inbound_channel_capacity: usize,

    #[serde(default = "default_feedback_channel_capacity")]
    pub feedback_channel_capacity: usize,

    #[serde(default = "default_drain_batch_size")]
    pub drain_batch_size: usize,

    #[serde(default = "default_feedback_drain_size")]
    pub feedback_drain_size: usize,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            shard_count: default_shard_count(),
            registry_capacity_per_shard: default_registry_capacity(),
            idle_expire_secs: default_idle_expire_secs(),
            inbound_channel_capacity: default_inbound_channel_capacity(),
            feedback_channel_capacity: default_feedback_channel_capacity(),
            drain_batch_size: default_drain_batch_size(),
            feedback_drain_size: default_feedback_drain_size(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Tier2Config {
    /// Forwarder is disabled entirely when unset (§6 `TIER2_URL`).
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max_attempts")]
    pub backoff_max_attempts: u32,

    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    #[serde(default = "default_fallback_path")]
    pub fallback_path: PathBuf,

    #[serde(default = "default_outbound_channel_capacity")]
    pub outbound_channel_capacity: usize,
}

impl Default for Tier2Config {
    fn default() -> Self {
        Self {
            url: None,
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_attempts: default_backoff_max_attempts(),
            backoff_cap_ms: default_backoff_cap_ms(),
            fallback_path: default_fallback_path(),
            outbound_channel_capacity: default_outbound_channel_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub dir: PathBuf,

    #[serde(default = "default_checkpoint_interval_events")]
    pub interval_events: u64,

    #[serde(default = "default_checkpoint_interval_secs")]
    pub interval_secs: u64,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: default_checkpoint_dir(),
            interval_events: default_checkpoint_interval_events(),
            interval_secs: default_checkpoint_interval_secs(),
        }
    }
}

/// Per-class token-bucket rates for the classified backpressure drops
/// §4.7 names (`drop.ingest`, `drop.shard`, `drop.persistence`,
/// `drop.feedback`, `drop.forwarder`). Feedback/policy traffic gets a
/// higher effective ceiling than raw ingest so it is never starved.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_ingest_max_rate")]
    pub ingest_max_rate: u64,

    #[serde(default = "default_ingest_burst")]
    pub ingest_burst: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            ingest_max_rate: default_ingest_max_rate(),
            ingest_burst: default_ingest_burst(),
        }
    }
}

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}
fn default_request_timeout() -> u64 {
    5
}
fn default_enable_cors() -> bool {
    true
}
fn default_ingest_batch_max() -> usize {
    10_000
}
fn default_shard_count() -> usize {
    num_cpus::get().next_power_of_two().max(1)
}
fn default_registry_capacity() -> usize {
    100_000
}
fn default_idle_expire_secs() -> u64 {
    24 * 3600
}
fn default_inbound_channel_capacity() -> usize {
    16_384
}
fn default_feedback_channel_capacity() -> usize {
    4_096
}
fn default_drain_batch_size() -> usize {
    64
}
fn default_feedback_drain_size() -> usize {
    16
}
fn default_batch_size() -> usize {
    100
}
fn default_flush_interval_ms() -> u64 {
    1_000
}
fn default_backoff_base_ms() -> u64 {
    100
}
fn default_backoff_max_attempts() -> u32 {
    3
}
fn default_backoff_cap_ms() -> u64 {
    5_000
}
fn default_fallback_path() -> PathBuf {
    PathBuf::from("./gatekeeper-data/forwarder-fallback.jsonl")
}
fn default_outbound_channel_capacity() -> usize {
    8_192
}
fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("./gatekeeper-data/checkpoints")
}
fn default_checkpoint_interval_events() -> u64 {
    10_000
}
fn default_checkpoint_interval_secs() -> u64 {
    60
}
fn default_ingest_max_rate() -> u64 {
    150_000
}
fn default_ingest_burst() -> u64 {
    50_000
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_http_addr(),
            request_timeout_secs: default_request_timeout(),
            enable_cors: default_enable_cors(),
            ingest_batch_max: default_ingest_batch_max(),
        }
    }
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            server: HttpServerConfig::default(),
            sharding: ShardingConfig::default(),
            tier2: Tier2Config::default(),
            checkpoint: CheckpointConfig::default(),
            admission: AdmissionConfig::default(),
            profile: ProfileConfig::default(),
        }
    }
}

impl GatekeeperConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Environment variables per §6: `TIER2_URL`, `SHARD_COUNT`,
    /// `REGISTRY_CAPACITY_PER_SHARD`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("TIER2_URL") {
            config.tier2.url = Some(url);
        }
        if let Ok(count) = std::env::var("SHARD_COUNT") {
            if let Ok(val) = count.parse::<usize>() {
                config.sharding.shard_count = val;
            }
        }
        if let Ok(cap) = std::env::var("REGISTRY_CAPACITY_PER_SHARD") {
            if let Ok(val) = cap.parse::<usize>() {
                config.sharding.registry_capacity_per_shard = val;
            }
        }
        config
    }

    /// Load with priority: file > env > defaults.
    pub fn load(config_file: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = config_file {
            if path.exists() {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(&path)?
            } else {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
        } else {
            Self::default()
        };

        if std::env::var("TIER2_URL").is_ok() {
            config.tier2.url = Self::from_env().tier2.url;
        }
        if std::env::var("SHARD_COUNT").is_ok() {
            config.sharding.shard_count = Self::from_env().sharding.shard_count;
        }
        if std::env::var("REGISTRY_CAPACITY_PER_SHARD").is_ok() {
            config.sharding.registry_capacity_per_shard =
                Self::from_env().sharding.registry_capacity_per_shard;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sharding.shard_count.is_power_of_two() {
            anyhow::bail!(
                "sharding.shard_count ({}) must be a power of two",
                self.sharding.shard_count
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        GatekeeperConfig::default().validate().unwrap();
    }

    #[test]
    fn test_non_power_of_two_shard_count_rejected() {
        let mut config = GatekeeperConfig::default();
        config.sharding.shard_count = 3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_config_file_falls_back_to_defaults() {
        let config = GatekeeperConfig::load(Some(PathBuf::from("/nonexistent/gatekeeper.toml")))
            .unwrap();
        assert_eq!(config.server.listen_addr, default_http_addr());
    }
}
