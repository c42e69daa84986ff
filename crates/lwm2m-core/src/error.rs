//! Transport send errors.

use thiserror::Error;

/// Failure raised by a transport while sending a request.
///
/// A timeout is not an error: senders report it as an absent response.
#[derive(Debug, Error)]
pub enum SendError {
    /// The server refused the connection.
    #[error("connection refused to {addr}")]
    ConnectionRefused {
        /// Address that refused.
        addr: String,
    },

    /// The server reset the connection.
    #[error("connection reset by peer")]
    ConnectionReset,

    /// No connection is open to the server.
    #[error("not connected")]
    NotConnected,

    /// No endpoint was created for the server.
    #[error("no endpoint for server {server_id}")]
    NoEndpoint {
        /// Short server id without an endpoint.
        server_id: u64,
    },

    /// The request could not be encoded.
    #[error("request encoding failed: {reason}")]
    Encoding {
        /// Encoder message.
        reason: String,
    },

    /// Any other transport failure.
    #[error("send failed: {reason}")]
    Other {
        /// Transport message.
        reason: String,
    },

    /// Socket level failure.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

/// Result type for transport sends.
pub type Result<T> = std::result::Result<T, SendError>;
