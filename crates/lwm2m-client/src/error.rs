//! Registration engine errors.

use thiserror::Error;

/// Errors surfaced by the registration engine.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Neither a management nor a bootstrap server is provisioned.
    #[error("no valid server available: neither a management nor a bootstrap server is provisioned")]
    NoServerAvailable,

    /// `bootstrap_finished` called without an open session.
    #[error("no bootstrap session in progress")]
    NotInBootstrapSession,

    /// Configuration rejected by `validate`.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong.
        reason: String,
    },

    /// A lifecycle task panicked; the engine keeps running.
    #[error("task panicked: {reason}")]
    TaskPanicked {
        /// Panic payload, when it was a string.
        reason: String,
    },
}

/// Result type for registration engine operations.
pub type Result<T> = std::result::Result<T, ClientError>;
