//! Monitor configuration.
//!
//! All sections deserialize from JSON with per-field defaults, so a config
//! file only needs to name what it changes:
//!
//! ```json
//! { "store": { "overflow": { "policy": "block", "timeout_ms": 50 } },
//!   "stream": { "throttle_ms": 100 } }
//! ```

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// What the bus does when a subscriber's buffer is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Remove the subscriber and close its channel.
    #[default]
    Disconnect,
    /// Discard the subscriber's oldest queued event to make room.
    DropOldest,
    /// Wait up to `timeout_ms` for room, then disconnect.
    Block { timeout_ms: u64 },
}

/// Store and bus configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Per-subscriber inbound buffer.
    /// Default: 1000
    pub channel_capacity: usize,

    /// Batches a throttled subscription may queue for its consumer.
    /// Default: 16
    pub output_capacity: usize,

    /// Policy for full subscriber buffers.
    pub overflow: OverflowPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
            output_capacity: 16,
            overflow: OverflowPolicy::Disconnect,
        }
    }
}

impl StoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.channel_capacity == 0 {
            return Err(MonitorError::Config(
                "channel_capacity must be greater than zero".to_string(),
            ));
        }
        if self.output_capacity == 0 {
            return Err(MonitorError::Config(
                "output_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Push-transport configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Throttle window for the stream's subscription.
    pub throttle_ms: u64,

    /// Idle time before a keepalive frame is sent.
    pub keepalive_ms: u64,

    /// Frame name for store events.
    pub event_name: String,

    /// Frame name for keepalives.
    pub keepalive_name: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            throttle_ms: 250,
            keepalive_ms: 10_000,
            event_name: "store.event".to_string(),
            keepalive_name: "ping".to_string(),
        }
    }
}

impl StreamConfig {
    pub fn throttle(&self) -> Duration {
        Duration::from_millis(self.throttle_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keepalive_ms == 0 {
            return Err(MonitorError::Config(
                "keepalive_ms must be greater than zero".to_string(),
            ));
        }
        if self.event_name.is_empty() || self.keepalive_name.is_empty() {
            return Err(MonitorError::Config("frame names must not be empty".to_string()));
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub store: StoreConfig,
    pub stream: StreamConfig,

    /// Hashed access key for the control endpoint.
    pub key_file: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            stream: StreamConfig::default(),
            key_file: PathBuf::from("./data/auth.sec"),
        }
    }
}

impl MonitorConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: MonitorConfig =
            serde_json::from_str(json).map_err(|e| MonitorError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.stream.validate()
    }
}
