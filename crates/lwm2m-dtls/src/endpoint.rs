//! A UDP socket shared by all DTLS peers.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use tokio::net::UdpSocket;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DtlsConfig;
use crate::connection::{DtlsConnection, DtlsServices};
use crate::cookie::CookieVerifier;
use crate::error::{DtlsError, Result};
use crate::handshake::{ApplicationDataReceiver, DatagramSink, HandshakeFactory, TransportContext};

/// Largest UDP payload, so the kernel never truncates a datagram silently.
const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Demultiplexes datagrams of one socket into per-peer [`DtlsConnection`]s.
pub struct DtlsEndpoint {
    socket: Arc<UdpSocket>,
    config: DtlsConfig,
    services: DtlsServices,
    connections: DashMap<SocketAddr, Arc<DtlsConnection>>,
}

impl DtlsEndpoint {
    /// Binds a socket on `addr`. Connection loops run on the current runtime.
    pub async fn bind(
        addr: SocketAddr,
        config: DtlsConfig,
        handshakes: Arc<dyn HandshakeFactory>,
        receiver: Arc<dyn ApplicationDataReceiver>,
    ) -> Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        info!(local = %socket.local_addr()?, "DTLS endpoint bound");
        Ok(Self::from_socket(
            socket,
            config,
            Handle::current(),
            handshakes,
            receiver,
        ))
    }

    /// Wraps an already bound socket. Connection loops are spawned on `runtime`.
    pub fn from_socket(
        socket: Arc<UdpSocket>,
        config: DtlsConfig,
        runtime: Handle,
        handshakes: Arc<dyn HandshakeFactory>,
        receiver: Arc<dyn ApplicationDataReceiver>,
    ) -> Self {
        let sink: Arc<dyn DatagramSink> = socket.clone();
        let services = DtlsServices {
            runtime,
            sink,
            verifier: Arc::new(CookieVerifier::new()),
            handshakes,
            receiver,
            mtu: config.mtu,
        };
        Self {
            socket,
            config,
            services,
            connections: DashMap::new(),
        }
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Connection state for `remote`, created on first use.
    pub fn connection(&self, remote: SocketAddr) -> Arc<DtlsConnection> {
        self.connections
            .entry(remote)
            .or_insert_with(|| {
                debug!(remote = %remote, "new peer");
                Arc::new(DtlsConnection::new(remote, self.services.clone()))
            })
            .clone()
    }

    /// Connection state for a peer, if any.
    pub fn get(&self, remote: &SocketAddr) -> Option<Arc<DtlsConnection>> {
        self.connections.get(remote).map(|c| c.clone())
    }

    /// Hands a received datagram to its peer's connection.
    pub fn dispatch(&self, remote: SocketAddr, datagram: Bytes) {
        self.connection(remote).datagram_received(datagram);
    }

    /// Receives datagrams until `shutdown` is cancelled.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("DTLS endpoint stopped");
                    return Ok(());
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, remote)) if len > self.config.mtu => {
                        warn!(remote = %remote, len, mtu = self.config.mtu, "dropping datagram larger than MTU");
                    }
                    Ok((len, remote)) => {
                        self.dispatch(remote, Bytes::copy_from_slice(&buf[..len]));
                    }
                    Err(err) => {
                        warn!("receive failed: {}", err);
                        debug!("receive failed: {:?}", err);
                    }
                },
            }
        }
    }

    /// Sends application data to an already connected peer.
    pub async fn send(
        &self,
        remote: SocketAddr,
        data: &[u8],
        expected: &TransportContext,
    ) -> Result<()> {
        let connection = self
            .get(&remote)
            .ok_or(DtlsError::UnknownPeer { remote })?;
        connection.send_application_data(data, expected).await
    }

    /// Forgets a peer. Returns false when it was unknown.
    pub fn evict(&self, remote: &SocketAddr) -> bool {
        self.connections.remove(remote).is_some()
    }

    /// Drops connections without traffic for longer than the idle timeout.
    /// Connections with a running loop are kept.
    pub fn evict_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout();
        let now = Instant::now();
        let mut evicted = 0;
        self.connections.retain(|remote, connection| {
            let keep = connection.is_processing()
                || now.duration_since(connection.last_activity()) < idle_timeout;
            if !keep {
                debug!(remote = %remote, "evicting idle peer");
                evicted += 1;
            }
            keep
        });
        evicted
    }

    /// Number of tracked peers.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
