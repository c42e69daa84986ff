//! Registration engine configuration.

use std::path::Path;
use std::time::Duration;

use lwm2m_core::ContentFormat;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Timing and behavior knobs of the registration engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout for bootstrap, register and update requests (default: 120000).
    pub request_timeout_ms: u64,
    /// Timeout for deregister requests (default: 1000).
    pub deregistration_timeout_ms: u64,
    /// How long to wait for the bootstrap server to finish (default: 93).
    pub bootstrap_session_timeout_secs: u64,
    /// Backoff before retrying after a failed bootstrap or registration (default: 600000).
    pub retry_waiting_time_ms: u64,
    /// Upper bound on the interval between updates. Unset means the lifetime-based period.
    pub communication_period_ms: Option<u64>,
    /// Force a reconnection before each update (default: false).
    pub reconnect_on_update: bool,
    /// Try to resume the secure session when reconnecting (default: true).
    pub resume_on_connect: bool,
    /// Register in queue mode (default: false).
    pub queue_mode: bool,
    /// Content format requested from the bootstrap server.
    pub preferred_content_format: Option<ContentFormat>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 120_000,
            deregistration_timeout_ms: 1_000,
            bootstrap_session_timeout_secs: 93,
            retry_waiting_time_ms: 600_000,
            communication_period_ms: None,
            reconnect_on_update: false,
            resume_on_connect: true,
            queue_mode: false,
            preferred_content_format: None,
        }
    }
}

impl EngineConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: EngineConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(ClientError::InvalidConfig {
                reason: "request_timeout_ms must be positive".to_string(),
            });
        }
        if self.deregistration_timeout_ms == 0 {
            return Err(ClientError::InvalidConfig {
                reason: "deregistration_timeout_ms must be positive".to_string(),
            });
        }
        if self.communication_period_ms == Some(0) {
            return Err(ClientError::InvalidConfig {
                reason: "communication_period_ms must be positive when set".to_string(),
            });
        }
        Ok(())
    }

    /// Register and update request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Deregister request timeout.
    pub fn deregistration_timeout(&self) -> Duration {
        Duration::from_millis(self.deregistration_timeout_ms)
    }

    /// Bootstrap session timeout, measured from the bootstrap request.
    pub fn bootstrap_session_timeout(&self) -> Duration {
        Duration::from_secs(self.bootstrap_session_timeout_secs)
    }

    /// Pause before retrying after every server failed.
    pub fn retry_waiting_time(&self) -> Duration {
        Duration::from_millis(self.retry_waiting_time_ms)
    }

    /// Upper bound for the update period, if configured.
    pub fn communication_period(&self) -> Option<Duration> {
        self.communication_period_ms.map(Duration::from_millis)
    }
}
