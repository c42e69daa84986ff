//! Queued delivery configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::QueuedRequestSender`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// How long a request may wait for delivery (default: 86400000, one day).
    pub send_expiration_ms: u64,
    /// How long a request is kept before being discarded (default: 172800000, two days).
    pub keep_expiration_ms: u64,
    /// Timeout of each downlink request (default: 120000).
    pub request_timeout_ms: u64,
    /// Interval between expiration sweeps (default: 60000).
    pub sweep_interval_ms: u64,
    /// Time a queue-mode client stays awake after its last message. Unset disables the timer.
    pub client_awake_time_ms: Option<u64>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            send_expiration_ms: 24 * 60 * 60 * 1000,
            keep_expiration_ms: 2 * 24 * 60 * 60 * 1000,
            request_timeout_ms: 120_000,
            sweep_interval_ms: 60_000,
            client_awake_time_ms: Some(93_000),
        }
    }
}

impl QueueConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: QueueConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        if config.keep_expiration_ms < config.send_expiration_ms {
            anyhow::bail!(
                "keep_expiration_ms ({}) must not be shorter than send_expiration_ms ({})",
                config.keep_expiration_ms,
                config.send_expiration_ms
            );
        }
        Ok(config)
    }

    /// How long a queued request stays deliverable.
    pub fn send_expiration(&self) -> Duration {
        Duration::from_millis(self.send_expiration_ms)
    }

    /// How long an expired request is kept before removal.
    pub fn keep_expiration(&self) -> Duration {
        Duration::from_millis(self.keep_expiration_ms)
    }

    /// Per-request response timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Period of the expiration sweep.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// `None` disables the presence timer.
    pub fn client_awake_time(&self) -> Option<Duration> {
        self.client_awake_time_ms.map(Duration::from_millis)
    }
}
