//! Queue and delivery errors.

use lwm2m_core::{RequestTicket, SendError};
use thiserror::Error;

use crate::queue::{RequestState, SequenceId};

/// Errors returned by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The ticket is already in the queue.
    #[error("request {ticket} is already enqueued")]
    AlreadyEnqueued {
        /// Duplicate ticket.
        ticket: RequestTicket,
    },

    /// Only fresh requests can be enqueued.
    #[error("request {ticket} cannot be enqueued from state {state:?}")]
    NotEnqueueable {
        /// Rejected ticket.
        ticket: RequestTicket,
        /// Its current state.
        state: RequestState,
    },

    /// No such request in the endpoint's queue.
    #[error("no request {ticket} queued for {endpoint}")]
    UnknownRequest {
        /// Client endpoint name.
        endpoint: String,
        /// Missing ticket.
        ticket: RequestTicket,
    },

    /// No such sequence in the endpoint's queue.
    #[error("no sequence {sequence} queued for {endpoint}")]
    UnknownSequence {
        /// Client endpoint name.
        endpoint: String,
        /// Missing sequence.
        sequence: SequenceId,
    },

    /// The request state machine forbids the change.
    #[error("invalid transition for request {ticket}: {from:?} -> {to:?}")]
    InvalidTransition {
        /// Affected ticket.
        ticket: RequestTicket,
        /// Current state.
        from: RequestState,
        /// Requested state.
        to: RequestState,
    },

    /// The endpoint has no registration.
    #[error("client {endpoint} is not registered")]
    UnknownClient {
        /// Client endpoint name.
        endpoint: String,
    },
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

/// Why a downlink request ended without a response.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// No answer within the request timeout.
    #[error("no response within {timeout_ms}ms")]
    Timeout {
        /// Timeout that elapsed.
        timeout_ms: u64,
    },

    /// The send expiration passed while the client slept.
    #[error("send expiration reached before delivery")]
    Expired,

    /// Removed from the queue without being sent.
    #[error("dropped: {reason}")]
    Dropped {
        /// Why it was dropped.
        reason: String,
    },

    /// The transport failed to send.
    #[error(transparent)]
    Transport(#[from] SendError),
}
