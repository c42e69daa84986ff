//! Lifecycle tasks the registration engine schedules.

use lwm2m_core::{RegistrationUpdate, ServerIdentity};

/// Unit of work submitted to the engine's scheduler.
///
/// Bodies run one at a time under the engine's task lock.
#[derive(Debug, Clone)]
pub enum LifecycleTask {
    /// Client-initiated bootstrap, then registration with the provisioned server.
    Bootstrap {
        /// Deregister from every server before contacting the bootstrap server.
        deregister_first: bool,
    },
    /// Registration with `server`.
    Register {
        /// Target server.
        server: ServerIdentity,
    },
    /// Periodic or triggered update of an existing registration.
    Update {
        /// Registered server.
        server: ServerIdentity,
        /// Registration being refreshed.
        registration_id: String,
        /// Changed fields.
        update: RegistrationUpdate,
    },
    /// Application-requested update, turned into an immediate [`LifecycleTask::Update`].
    QueuedUpdate {
        /// Target server, or the registered one.
        server: Option<ServerIdentity>,
        /// Changed fields.
        update: RegistrationUpdate,
    },
}

impl LifecycleTask {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            LifecycleTask::Bootstrap { .. } => "bootstrap",
            LifecycleTask::Register { .. } => "register",
            LifecycleTask::Update { .. } => "update",
            LifecycleTask::QueuedUpdate { .. } => "queued update",
        }
    }
}
