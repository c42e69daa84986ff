#![warn(missing_docs)]

//! LWM2M shared model: server identities, server info, uplink/downlink requests, response codes and send outcomes

pub mod error;
pub mod identity;
pub mod outcome;
pub mod request;
pub mod response;
pub mod servers;

pub use error::{Result, SendError};
pub use identity::{ServerIdentity, ServerRole};
pub use outcome::SendOutcome;
pub use request::{
    ContentFormat, DownlinkOperation, DownlinkRequest, Link, RegisterRequest, RegistrationUpdate,
    RequestTicket, UpdateRequest, UplinkRequest,
};
pub use response::{Response, ResponseCode};
pub use servers::{select_server, BindingMode, DmServerInfo, ServerInfo, ServersInfo};
