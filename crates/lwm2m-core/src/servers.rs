//! Server descriptions read from the client's object tree.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Transport binding advertised by the client at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum BindingMode {
    /// UDP, always reachable.
    #[default]
    #[serde(rename = "U")]
    Udp,
    /// UDP with queue mode: the client sleeps between exchanges.
    #[serde(rename = "UQ")]
    UdpQueue,
    /// TCP, always reachable.
    #[serde(rename = "T")]
    Tcp,
    /// TCP with queue mode.
    #[serde(rename = "TQ")]
    TcpQueue,
}

impl BindingMode {
    /// Wire form of the binding.
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingMode::Udp => "U",
            BindingMode::UdpQueue => "UQ",
            BindingMode::Tcp => "T",
            BindingMode::TcpQueue => "TQ",
        }
    }

    /// Returns true if the binding carries the queue-mode flag.
    pub fn is_queue_mode(&self) -> bool {
        matches!(self, BindingMode::UdpQueue | BindingMode::TcpQueue)
    }
}

impl fmt::Display for BindingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection information for one server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// Short server id.
    pub server_id: u64,
    /// Server URI.
    pub uri: String,
    /// Whether this entry describes a bootstrap server.
    pub bootstrap: bool,
}

impl ServerInfo {
    /// Describes a bootstrap server.
    pub fn bootstrap(uri: impl Into<String>) -> Self {
        Self {
            server_id: 0,
            uri: uri.into(),
            bootstrap: true,
        }
    }

    /// Describes a management server.
    pub fn management(server_id: u64, uri: impl Into<String>) -> Self {
        Self {
            server_id,
            uri: uri.into(),
            bootstrap: false,
        }
    }
}

/// A device management server entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DmServerInfo {
    /// Connection information.
    pub info: ServerInfo,
    /// Registration lifetime in seconds.
    pub lifetime: u64,
    /// Binding advertised to this server.
    pub binding: BindingMode,
}

impl DmServerInfo {
    /// Creates a management server entry.
    pub fn new(server_id: u64, uri: impl Into<String>, lifetime: u64, binding: BindingMode) -> Self {
        Self {
            info: ServerInfo::management(server_id, uri),
            lifetime,
            binding,
        }
    }

    /// Short server id.
    pub fn server_id(&self) -> u64 {
        self.info.server_id
    }
}

/// All servers currently provisioned on the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersInfo {
    /// Bootstrap server, if provisioned.
    pub bootstrap: Option<ServerInfo>,
    /// Management servers keyed by short server id.
    pub device_managements: BTreeMap<u64, DmServerInfo>,
}

impl ServersInfo {
    /// Adds a management server entry, replacing any entry with the same id.
    pub fn with_management(mut self, server: DmServerInfo) -> Self {
        self.device_managements.insert(server.server_id(), server);
        self
    }

    /// Sets the bootstrap server entry.
    pub fn with_bootstrap(mut self, server: ServerInfo) -> Self {
        self.bootstrap = Some(server);
        self
    }

    /// Looks up a management server by short server id.
    pub fn management(&self, server_id: u64) -> Option<&DmServerInfo> {
        self.device_managements.get(&server_id)
    }
}

/// Picks the management server the client registers with.
///
/// Only one registration is supported: with several entries the one with the
/// lowest short server id wins.
pub fn select_server(servers: &ServersInfo) -> Option<&DmServerInfo> {
    if servers.device_managements.len() > 1 {
        warn!(
            count = servers.device_managements.len(),
            "several management servers provisioned, only the lowest server id is used"
        );
    }
    servers.device_managements.values().next()
}
