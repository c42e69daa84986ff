//! Authorization of server-initiated requests.

use std::sync::Arc;

use lwm2m_core::{ServerIdentity, ServerRole};
use tracing::debug;

use crate::bootstrap::BootstrapSession;
use crate::registry::RegistrationRegistry;

/// Decides whether a server may send requests to the client.
///
/// The bootstrap server is trusted only during its session. Management
/// servers are trusted while registered or while registration is in flight.
#[derive(Clone)]
pub struct IdentityTracker {
    bootstrap: Arc<BootstrapSession>,
    registry: Arc<RegistrationRegistry>,
}

impl IdentityTracker {
    /// Tracker over the given session and registry.
    pub fn new(bootstrap: Arc<BootstrapSession>, registry: Arc<RegistrationRegistry>) -> Self {
        Self {
            bootstrap,
            registry,
        }
    }

    /// Bootstrap servers only during a bootstrap session, management servers only while registered or registering.
    pub fn is_allowed_to_communicate(&self, server: &ServerIdentity) -> bool {
        let allowed = match server.role() {
            ServerRole::Bootstrap => self.bootstrap.is_bootstrap_server(server),
            ServerRole::Management => {
                self.registry.is_registered(server) || self.registry.is_registering(server)
            }
        };
        if !allowed {
            debug!(server = %server, "server not allowed to communicate");
        }
        allowed
    }
}
