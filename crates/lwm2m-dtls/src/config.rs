//! DTLS endpoint configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::DtlsEndpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DtlsConfig {
    /// Largest datagram sent or received (default: 1500).
    pub mtu: usize,
    /// Connections idle for longer are evicted by [`crate::DtlsEndpoint::evict_idle`] (default: 600).
    pub idle_timeout_secs: u64,
}

impl Default for DtlsConfig {
    fn default() -> Self {
        Self {
            mtu: 1500,
            idle_timeout_secs: 600,
        }
    }
}

impl DtlsConfig {
    /// Loads a configuration from a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: DtlsConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        if config.mtu < crate::record::RECORD_HEADER_LENGTH {
            anyhow::bail!("mtu ({}) is smaller than a record header", config.mtu);
        }
        Ok(config)
    }

    /// Idle time after which a connection is evicted.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
