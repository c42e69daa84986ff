//! Transport-facing collaborators of the engine.

use std::time::Duration;

use async_trait::async_trait;
use lwm2m_core::{Response, SendError, ServerIdentity, ServerInfo, UplinkRequest};
use tracing::warn;

/// CoAP EXCHANGE_LIFETIME with default transmission parameters.
pub const EXCHANGE_LIFETIME: Duration = Duration::from_millis(247_000);

/// Shortest update period worth keeping before falling back to a fraction of the lifetime.
pub const MIN_COMMUNICATION_PERIOD: Duration = Duration::from_millis(30_000);

/// Sends uplink requests to a server.
#[async_trait]
pub trait UplinkSender: Send + Sync {
    /// Sends `request` and waits up to `timeout`.
    ///
    /// `Ok(None)` means no response arrived in time.
    async fn send(
        &self,
        server: &ServerIdentity,
        request: UplinkRequest,
        timeout: Duration,
    ) -> Result<Option<Response>, SendError>;
}

/// Creates and maintains connections to servers.
#[async_trait]
pub trait EndpointsManager: Send + Sync {
    /// Opens a connection to `info`. `None` when the endpoint cannot be created.
    async fn create_endpoint(&self, info: &ServerInfo) -> Option<ServerIdentity>;

    /// Drops the current connection and reconnects, resuming the secure session if asked.
    async fn force_reconnection(&self, server: &ServerIdentity, resume: bool);

    /// Longest interval between two updates that keeps a registration of
    /// `lifetime` alive over this server's transport.
    fn max_communication_period(&self, _server: &ServerIdentity, lifetime: Duration) -> Duration {
        max_communication_period(lifetime)
    }
}

/// Leaves one exchange lifetime of margin before the registration expires.
///
/// Short lifetimes cannot afford that margin, so they get a proportional share
/// that still lands above one second.
pub fn max_communication_period(lifetime: Duration) -> Duration {
    let lifetime_ms = lifetime.as_millis();
    let exchange_ms = EXCHANGE_LIFETIME.as_millis();
    let floor_ms = MIN_COMMUNICATION_PERIOD.as_millis();

    if lifetime_ms >= exchange_ms + floor_ms {
        lifetime - EXCHANGE_LIFETIME
    } else {
        let period_ms = lifetime_ms * (floor_ms - 1_000) / (exchange_ms + floor_ms) + 1_000;
        warn!(
            lifetime_ms = lifetime_ms as u64,
            period_ms = period_ms as u64,
            "lifetime too short for the exchange lifetime margin, using a proportional update period"
        );
        Duration::from_millis(period_ms as u64)
    }
}
