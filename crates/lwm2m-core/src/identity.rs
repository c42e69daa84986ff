//! Identity of a remote LWM2M server as seen by the client.

use std::fmt;
use std::hash::{Hash, Hasher};

/// Role a server plays for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerRole {
    /// Bootstrap server, provisions the client with management servers.
    Bootstrap,
    /// Device management server, the client registers with it.
    Management,
}

/// A server the client holds a connection to.
///
/// Two identities are equal when they share the same underlying connection,
/// whatever their descriptive fields say.
#[derive(Debug, Clone)]
pub struct ServerIdentity {
    connection_id: u64,
    server_id: u64,
    uri: String,
    role: ServerRole,
}

impl ServerIdentity {
    /// Creates an identity for a management server connection.
    pub fn management(connection_id: u64, server_id: u64, uri: impl Into<String>) -> Self {
        Self {
            connection_id,
            server_id,
            uri: uri.into(),
            role: ServerRole::Management,
        }
    }

    /// Creates an identity for a bootstrap server connection.
    pub fn bootstrap(connection_id: u64, uri: impl Into<String>) -> Self {
        Self {
            connection_id,
            server_id: 0,
            uri: uri.into(),
            role: ServerRole::Bootstrap,
        }
    }

    /// Identifier of the underlying connection.
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Short server id (0 for bootstrap servers).
    pub fn server_id(&self) -> u64 {
        self.server_id
    }

    /// Server URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Role of this server.
    pub fn role(&self) -> ServerRole {
        self.role
    }

    /// Returns true for bootstrap servers.
    pub fn is_bootstrap(&self) -> bool {
        self.role == ServerRole::Bootstrap
    }
}

impl PartialEq for ServerIdentity {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
    }
}

impl Eq for ServerIdentity {}

impl Hash for ServerIdentity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.connection_id.hash(state);
    }
}

impl fmt::Display for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            ServerRole::Bootstrap => write!(f, "bootstrap server [{}]", self.uri),
            ServerRole::Management => {
                write!(f, "server {} [{}]", self.server_id, self.uri)
            }
        }
    }
}
