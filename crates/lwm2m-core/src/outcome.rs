//! Classification of a send attempt.

use crate::error::SendError;
use crate::response::{Response, ResponseCode};

/// Result of sending one request, matched exhaustively by callers.
#[derive(Debug)]
pub enum SendOutcome {
    /// The peer answered with a 2.xx code.
    Success(Response),
    /// The peer answered with an error code.
    Rejected {
        /// Error code.
        code: ResponseCode,
        /// Diagnostic message, if any.
        message: Option<String>,
    },
    /// No answer within the request timeout.
    Timeout,
    /// The request could not be sent.
    TransportError(SendError),
}

impl SendOutcome {
    /// Classifies what a transport returned. An absent response is a timeout.
    pub fn classify(result: Result<Option<Response>, SendError>) -> Self {
        match result {
            Ok(Some(response)) if response.is_success() => SendOutcome::Success(response),
            Ok(Some(response)) => SendOutcome::Rejected {
                code: response.code,
                message: response.error_message,
            },
            Ok(None) => SendOutcome::Timeout,
            Err(err) => SendOutcome::TransportError(err),
        }
    }

    /// Returns true for [`SendOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, SendOutcome::Success(_))
    }

    /// Returns true for [`SendOutcome::Timeout`].
    pub fn is_timeout(&self) -> bool {
        matches!(self, SendOutcome::Timeout)
    }

    /// Short name used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            SendOutcome::Success(_) => "success",
            SendOutcome::Rejected { .. } => "rejected",
            SendOutcome::Timeout => "timeout",
            SendOutcome::TransportError(_) => "transport error",
        }
    }
}
