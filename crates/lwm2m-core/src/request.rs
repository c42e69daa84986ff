//! Requests exchanged between clients and servers.
//!
//! Uplink requests travel from client to server (bootstrap, register, update,
//! deregister). Downlink requests travel from server to client and are opaque
//! to the queuing layer.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::servers::BindingMode;

/// Protocol version sent at registration.
pub const LWM2M_VERSION: &str = "1.1";

/// Media types a client may ask the bootstrap server to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentFormat {
    /// text/plain
    Text,
    /// application/vnd.oma.lwm2m+tlv
    Tlv,
    /// application/vnd.oma.lwm2m+json
    Json,
    /// application/senml+json
    SenmlJson,
    /// application/senml+cbor
    SenmlCbor,
    /// application/cbor
    Cbor,
}

impl ContentFormat {
    /// CoAP content-format number.
    pub fn code(&self) -> u16 {
        match self {
            ContentFormat::Text => 0,
            ContentFormat::Cbor => 60,
            ContentFormat::SenmlJson => 110,
            ContentFormat::SenmlCbor => 112,
            ContentFormat::Tlv => 11542,
            ContentFormat::Json => 11543,
        }
    }
}

/// An object link advertised at registration, e.g. `</3/0>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    /// Target path.
    pub uri: String,
    /// Link attributes.
    pub attributes: BTreeMap<String, String>,
}

impl Link {
    /// Creates a link without attributes.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            attributes: BTreeMap::new(),
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.uri)?;
        for (key, value) in &self.attributes {
            write!(f, ";{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Registration sent to a management server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterRequest {
    /// Client endpoint name.
    pub endpoint: String,
    /// Lifetime in seconds.
    pub lifetime: u64,
    /// LWM2M version, e.g. `1.1`.
    pub lwm2m_version: String,
    /// Transport binding.
    pub binding: BindingMode,
    /// Queue mode support.
    pub queue_mode: bool,
    /// Objects and instances the client exposes.
    pub object_links: Vec<Link>,
    /// Extra query parameters sent as-is.
    pub additional_attributes: BTreeMap<String, String>,
}

/// Fields changed since the last registration or update.
///
/// An empty update only refreshes the registration lifetime on the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationUpdate {
    /// New lifetime in seconds.
    pub lifetime: Option<u64>,
    /// New binding.
    pub binding: Option<BindingMode>,
    /// New object links.
    pub object_links: Option<Vec<Link>>,
    /// Changed additional attributes.
    pub additional_attributes: BTreeMap<String, String>,
}

impl RegistrationUpdate {
    /// Returns true if nothing changed.
    pub fn is_empty(&self) -> bool {
        self.lifetime.is_none()
            && self.binding.is_none()
            && self.object_links.is_none()
            && self.additional_attributes.is_empty()
    }
}

/// Update of an existing registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    /// Id the server returned at registration.
    pub registration_id: String,
    /// Changed registration fields.
    pub update: RegistrationUpdate,
}

/// A request sent by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkRequest {
    /// Client-initiated bootstrap.
    Bootstrap {
        /// Endpoint name.
        endpoint: String,
        /// Content format the client prefers for the bootstrap writes.
        preferred_content_format: Option<ContentFormat>,
    },
    /// Registration.
    Register(RegisterRequest),
    /// Registration update.
    Update(UpdateRequest),
    /// Deregistration.
    Deregister {
        /// Registration to remove.
        registration_id: String,
    },
}

impl UplinkRequest {
    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UplinkRequest::Bootstrap { .. } => "bootstrap",
            UplinkRequest::Register(_) => "register",
            UplinkRequest::Update(_) => "update",
            UplinkRequest::Deregister { .. } => "deregister",
        }
    }
}

/// Correlation id of a downlink request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestTicket(String);

impl RequestTicket {
    /// Wraps a caller-provided ticket.
    pub fn new(ticket: impl Into<String>) -> Self {
        Self(ticket.into())
    }

    /// Generates a random ticket.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Ticket as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestTicket {
    fn from(ticket: &str) -> Self {
        Self::new(ticket)
    }
}

/// Server-initiated operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DownlinkOperation {
    /// Read a resource or instance.
    Read,
    /// Write a value.
    Write,
    /// Execute a resource.
    Execute,
    /// Discover attributes.
    Discover,
    /// Create an object instance.
    Create,
    /// Delete an object instance.
    Delete,
    /// Start observing.
    Observe,
    /// Write notification attributes.
    WriteAttributes,
}

/// A server-initiated request. The payload is already encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownlinkRequest {
    /// What to do at `path`.
    pub operation: DownlinkOperation,
    /// Target path, e.g. `/3/0/0`.
    pub path: String,
    /// Payload format, when there is a payload.
    pub content_format: Option<ContentFormat>,
    /// Encoded payload, empty for reads.
    pub payload: Bytes,
}

impl DownlinkRequest {
    /// Creates a request without payload.
    pub fn new(operation: DownlinkOperation, path: impl Into<String>) -> Self {
        Self {
            operation,
            path: path.into(),
            content_format: None,
            payload: Bytes::new(),
        }
    }

    /// Attaches an encoded payload.
    pub fn with_payload(mut self, format: ContentFormat, payload: impl Into<Bytes>) -> Self {
        self.content_format = Some(format);
        self.payload = payload.into();
        self
    }
}
