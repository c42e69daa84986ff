//! Responses and response codes.

use std::fmt;

use bytes::Bytes;

/// CoAP response code of an LWM2M response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseCode {
    /// 2.01
    Created,
    /// 2.02
    Deleted,
    /// 2.03
    Valid,
    /// 2.04
    Changed,
    /// 2.05
    Content,
    /// 4.00
    BadRequest,
    /// 4.01
    Unauthorized,
    /// 4.03
    Forbidden,
    /// 4.04
    NotFound,
    /// 4.05
    MethodNotAllowed,
    /// 4.06
    NotAcceptable,
    /// 4.12
    PreconditionFailed,
    /// 4.15
    UnsupportedContentFormat,
    /// 5.00
    InternalServerError,
    /// 5.03
    ServiceUnavailable,
}

impl ResponseCode {
    /// Class and detail packed as `class * 100 + detail`, e.g. 404.
    pub fn code(&self) -> u16 {
        match self {
            ResponseCode::Created => 201,
            ResponseCode::Deleted => 202,
            ResponseCode::Valid => 203,
            ResponseCode::Changed => 204,
            ResponseCode::Content => 205,
            ResponseCode::BadRequest => 400,
            ResponseCode::Unauthorized => 401,
            ResponseCode::Forbidden => 403,
            ResponseCode::NotFound => 404,
            ResponseCode::MethodNotAllowed => 405,
            ResponseCode::NotAcceptable => 406,
            ResponseCode::PreconditionFailed => 412,
            ResponseCode::UnsupportedContentFormat => 415,
            ResponseCode::InternalServerError => 500,
            ResponseCode::ServiceUnavailable => 503,
        }
    }

    /// Returns true for 2.xx codes.
    pub fn is_success(&self) -> bool {
        self.code() / 100 == 2
    }

    /// Upper-case name.
    pub fn name(&self) -> &'static str {
        match self {
            ResponseCode::Created => "CREATED",
            ResponseCode::Deleted => "DELETED",
            ResponseCode::Valid => "VALID",
            ResponseCode::Changed => "CHANGED",
            ResponseCode::Content => "CONTENT",
            ResponseCode::BadRequest => "BAD_REQUEST",
            ResponseCode::Unauthorized => "UNAUTHORIZED",
            ResponseCode::Forbidden => "FORBIDDEN",
            ResponseCode::NotFound => "NOT_FOUND",
            ResponseCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ResponseCode::NotAcceptable => "NOT_ACCEPTABLE",
            ResponseCode::PreconditionFailed => "PRECONDITION_FAILED",
            ResponseCode::UnsupportedContentFormat => "UNSUPPORTED_CONTENT_FORMAT",
            ResponseCode::InternalServerError => "INTERNAL_SERVER_ERROR",
            ResponseCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.code();
        write!(f, "{}.{:02} {}", code / 100, code % 100, self.name())
    }
}

/// A response to an uplink or downlink request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Response code.
    pub code: ResponseCode,
    /// Diagnostic message attached to error responses.
    pub error_message: Option<String>,
    /// Location returned by a successful registration (the registration id).
    pub location: Option<String>,
    /// Encoded payload.
    pub payload: Bytes,
}

impl Response {
    /// Creates a response with only a code.
    pub fn new(code: ResponseCode) -> Self {
        Self {
            code,
            error_message: None,
            location: None,
            payload: Bytes::new(),
        }
    }

    /// Successful registration returning its location.
    pub fn created(location: impl Into<String>) -> Self {
        Self {
            location: Some(location.into()),
            ..Self::new(ResponseCode::Created)
        }
    }

    /// Error response with a diagnostic message.
    pub fn error(code: ResponseCode, message: impl Into<String>) -> Self {
        Self {
            error_message: Some(message.into()),
            ..Self::new(code)
        }
    }

    /// Attaches a payload.
    pub fn with_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Returns true for 2.xx codes.
    pub fn is_success(&self) -> bool {
        self.code.is_success()
    }
}
