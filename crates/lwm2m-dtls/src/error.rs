//! DTLS processing errors.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors raised while handling or sending DTLS records.
#[derive(Debug, Error)]
pub enum DtlsError {
    /// Malformed record or handshake message.
    #[error("invalid record: {reason}")]
    InvalidRecord {
        /// What failed to parse.
        reason: String,
    },

    /// Application data sent before the handshake completed.
    #[error("handshake with {remote} is not complete")]
    HandshakeIncomplete {
        /// Peer address.
        remote: SocketAddr,
    },

    /// The session was negotiated with another identity.
    #[error("connection at {remote} is not handled by a peer with the given transport context")]
    ContextMismatch {
        /// Peer address.
        remote: SocketAddr,
    },

    /// The handshake engine gave up.
    #[error("handshake failed: {reason}")]
    HandshakeFailed {
        /// Reason reported by the handshake.
        reason: String,
    },

    /// Encryption, decryption or MAC failure.
    #[error("record protection failed: {reason}")]
    Crypto {
        /// Failure detail.
        reason: String,
    },

    /// Outgoing record does not fit the MTU.
    #[error("datagram too large: {size} bytes (mtu {mtu})")]
    DatagramTooLarge {
        /// Record size in bytes.
        size: usize,
        /// Configured MTU.
        mtu: usize,
    },

    /// No connection state for the address.
    #[error("no connection with {remote}")]
    UnknownPeer {
        /// Peer address.
        remote: SocketAddr,
    },

    /// Socket failure.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result type for DTLS operations.
pub type Result<T> = std::result::Result<T, DtlsError>;
