#![warn(missing_docs)]

//! LWM2M client: bootstrap, registration, update and deregistration lifecycle engine

pub mod bootstrap;
pub mod config;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod identity;
pub mod object_tree;
pub mod observer;
pub mod registry;
pub mod scheduler;
pub mod task;

pub use bootstrap::BootstrapSession;
pub use config::EngineConfig;
pub use endpoints::{EndpointsManager, UplinkSender};
pub use engine::{EngineState, RegistrationEngine, RegistrationEngineBuilder};
pub use error::{ClientError, Result};
pub use identity::IdentityTracker;
pub use object_tree::{InMemoryObjectTree, ObjectTree};
pub use observer::{ClientObserver, NoopObserver};
pub use registry::{RegistrationListener, RegistrationRegistry};
pub use scheduler::{ScheduledTask, TaskScheduler};
pub use task::LifecycleTask;
