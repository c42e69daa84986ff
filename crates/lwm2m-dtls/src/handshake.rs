//! Seams between the per-peer connection loop and the DTLS protocol engine.
//!
//! The connection loop owns ordering and concurrency. Handshake state machines
//! and record protection are plugged in through these traits.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::UdpSocket;

use crate::error::Result;

/// Identity negotiated by a completed handshake.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransportContext {
    /// PSK identity, certificate subject or raw public key fingerprint.
    pub principal: String,
    /// Negotiated cipher suite name.
    pub cipher_suite: String,
}

impl TransportContext {
    /// Context for an established session.
    pub fn new(principal: impl Into<String>, cipher_suite: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            cipher_suite: cipher_suite.into(),
        }
    }
}

impl fmt::Display for TransportContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.principal, self.cipher_suite)
    }
}

/// Decrypted application payload with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationData {
    /// Decrypted payload.
    pub data: Bytes,
    /// Peer the payload came from.
    pub remote: SocketAddr,
    /// Session identity the payload arrived under.
    pub context: TransportContext,
}

/// Consumer of decrypted application payloads, typically the CoAP layer.
pub trait ApplicationDataReceiver: Send + Sync {
    /// Called on the connection's processing task. Must not block.
    fn packet_received(&self, data: ApplicationData);
}

/// Where outgoing datagrams go.
#[async_trait]
pub trait DatagramSink: Send + Sync {
    /// Sends one datagram to `remote`.
    async fn send_to(&self, datagram: &[u8], remote: SocketAddr) -> io::Result<usize>;
}

#[async_trait]
impl DatagramSink for UdpSocket {
    async fn send_to(&self, datagram: &[u8], remote: SocketAddr) -> io::Result<usize> {
        UdpSocket::send_to(self, datagram, remote).await
    }
}

/// Result of feeding one datagram to a handshake.
pub enum HandshakeProgress {
    /// More flights expected. Contains the datagrams to send now.
    Continue(Vec<Bytes>),
    /// Handshake done. `outgoing` holds the final flight.
    Complete {
        /// Record protection for the new epoch.
        session: Box<dyn SecureSession>,
        /// Identity of the new session.
        context: TransportContext,
        /// Final flight.
        outgoing: Vec<Bytes>,
    },
    /// Fatal alert or protocol error. The connection state is dropped.
    Failed {
        /// Alert or error description.
        reason: String,
    },
}

impl fmt::Debug for HandshakeProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeProgress::Continue(outgoing) => {
                f.debug_tuple("Continue").field(&outgoing.len()).finish()
            }
            HandshakeProgress::Complete {
                context, outgoing, ..
            } => f
                .debug_struct("Complete")
                .field("context", context)
                .field("outgoing", &outgoing.len())
                .finish(),
            HandshakeProgress::Failed { reason } => {
                f.debug_struct("Failed").field("reason", reason).finish()
            }
        }
    }
}

/// Server side of one in-flight handshake. Starts with the verified ClientHello.
pub trait Handshake: Send {
    /// Feeds one received record.
    fn on_datagram(&mut self, datagram: &[u8]) -> HandshakeProgress;
}

/// Creates a handshake for a peer that passed the cookie exchange.
pub trait HandshakeFactory: Send + Sync {
    /// Starts a handshake for `remote`.
    fn start(&self, remote: SocketAddr) -> Box<dyn Handshake>;
}

/// Record protection of an established session.
pub trait SecureSession: Send {
    /// Decrypts one datagram. `Ok(None)` for records carrying no application data.
    fn decrypt(&mut self, datagram: &[u8]) -> Result<Option<Bytes>>;

    /// Protects one application payload for sending.
    fn encrypt(&mut self, data: &[u8]) -> Result<Bytes>;
}
