#![warn(missing_docs)]

//! LWM2M DTLS endpoint: per-peer datagram processing, cookie exchange and session dispatch

pub mod config;
pub mod connection;
pub mod cookie;
pub mod endpoint;
pub mod error;
pub mod handshake;
pub mod record;

pub use config::DtlsConfig;
pub use connection::{ConnectionStats, DtlsConnection, DtlsServices};
pub use cookie::{CookieVerifier, HelloVerification};
pub use endpoint::DtlsEndpoint;
pub use error::{DtlsError, Result};
pub use handshake::{
    ApplicationData, ApplicationDataReceiver, DatagramSink, Handshake, HandshakeFactory,
    HandshakeProgress, SecureSession, TransportContext,
};
pub use record::{is_client_hello, ClientHello, ContentType, ProtocolVersion, RecordHeader};
