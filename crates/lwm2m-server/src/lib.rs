#![warn(missing_docs)]

//! LWM2M server: client registry, reachability tracking and queued downlink delivery

pub mod config;
pub mod error;
pub mod presence;
pub mod queue;
pub mod reachability;
pub mod registry;
pub mod sender;

pub use config::QueueConfig;
pub use error::{DeliveryError, QueueError, Result};
pub use presence::AwakeTimers;
pub use queue::{QueuedRequest, RequestQueue, RequestState, SequenceId, SweepReport};
pub use reachability::{PresenceListener, Reachability, ReachabilityTracker};
pub use registry::{ClientRegistry, ClientRegistryListener, Registration};
pub use sender::{DownlinkSender, QueuedRequestSender, ResponseListener, Submission};
