//! Lifecycle notifications for applications embedding the engine.

use lwm2m_core::{RegisterRequest, ResponseCode, ServerIdentity, UpdateRequest};

use crate::error::ClientError;

/// Receives lifecycle events from the registration engine.
///
/// Every method has a no-op default. Callbacks run on engine tasks and must not
/// block.
#[allow(unused_variables)]
pub trait ClientObserver: Send + Sync {
    /// Bootstrap request about to be sent.
    fn on_bootstrap_started(&self, server: &ServerIdentity) {}
    /// Bootstrap server sent Bootstrap-Finish.
    fn on_bootstrap_success(&self, server: &ServerIdentity) {}
    /// `code` is absent when the request never reached the server.
    fn on_bootstrap_failure(
        &self,
        server: &ServerIdentity,
        code: Option<ResponseCode>,
        message: Option<&str>,
    ) {
    }
    /// Bootstrap session timed out.
    fn on_bootstrap_timeout(&self, server: &ServerIdentity) {}

    /// Register request about to be sent.
    fn on_registration_started(&self, server: &ServerIdentity, request: &RegisterRequest) {}
    /// Server accepted the registration.
    fn on_registration_success(
        &self,
        server: &ServerIdentity,
        request: &RegisterRequest,
        registration_id: &str,
    ) {
    }
    /// Server rejected the register request or it could not be sent.
    fn on_registration_failure(
        &self,
        server: &ServerIdentity,
        request: &RegisterRequest,
        code: Option<ResponseCode>,
        message: Option<&str>,
    ) {
    }
    /// No answer within the request timeout.
    fn on_registration_timeout(&self, server: &ServerIdentity, request: &RegisterRequest) {}

    /// Update request about to be sent.
    fn on_update_started(&self, server: &ServerIdentity, request: &UpdateRequest) {}
    /// Server accepted the update.
    fn on_update_success(&self, server: &ServerIdentity, request: &UpdateRequest) {}
    /// `code` is absent when the update never reached the server.
    fn on_update_failure(
        &self,
        server: &ServerIdentity,
        request: &UpdateRequest,
        code: Option<ResponseCode>,
        message: Option<&str>,
    ) {
    }
    /// No answer within the request timeout.
    fn on_update_timeout(&self, server: &ServerIdentity, request: &UpdateRequest) {}

    /// Deregister request about to be sent.
    fn on_deregistration_started(&self, server: &ServerIdentity, registration_id: &str) {}
    /// Server removed the registration.
    fn on_deregistration_success(&self, server: &ServerIdentity, registration_id: &str) {}
    /// Server rejected the deregistration or it could not be sent.
    fn on_deregistration_failure(
        &self,
        server: &ServerIdentity,
        registration_id: &str,
        code: Option<ResponseCode>,
        message: Option<&str>,
    ) {
    }
    /// No answer within the deregistration timeout.
    fn on_deregistration_timeout(&self, server: &ServerIdentity, registration_id: &str) {}

    /// A task body failed in a way none of the other callbacks cover.
    fn on_unexpected_error(&self, error: &ClientError) {}
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}
