//! Stateless ClientHello verification (RFC 6347 section 4.2.1).
//!
//! The cookie is an HMAC-SHA256 over the remote address and the ClientHello
//! parameters, keyed by a random per-endpoint secret. A client proves it owns
//! its address by echoing the cookie from our HelloVerifyRequest.

use std::net::SocketAddr;

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use tracing::trace;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{DtlsError, Result};
use crate::record::{handshake_record, ClientHello, ProtocolVersion, HANDSHAKE_HELLO_VERIFY_REQUEST};

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 output length.
pub const COOKIE_LENGTH: usize = 32;

#[derive(Zeroize, ZeroizeOnDrop)]
struct CookieSecret([u8; 32]);

/// Outcome of [`CookieVerifier::verify`].
#[derive(Debug)]
pub enum HelloVerification {
    /// The ClientHello carries our cookie; a handshake may start.
    Verified(ClientHello),
    /// Cookie missing or wrong; send this HelloVerifyRequest back.
    HelloVerifyRequest(Bytes),
    /// Not a well-formed ClientHello.
    Invalid(DtlsError),
}

/// Issues and checks HelloVerifyRequest cookies.
pub struct CookieVerifier {
    secret: CookieSecret,
}

impl Default for CookieVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl CookieVerifier {
    /// Creates a verifier with a fresh random secret.
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let verifier = Self::with_secret(secret);
        secret.zeroize();
        verifier
    }

    /// Verifier with a fixed initial secret.
    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self {
            secret: CookieSecret(secret),
        }
    }

    /// Checks the cookie of a ClientHello datagram from `remote`.
    pub fn verify(&self, remote: SocketAddr, datagram: &[u8]) -> Result<HelloVerification> {
        let hello = match ClientHello::parse(datagram) {
            Ok(hello) => hello,
            Err(err) => return Ok(HelloVerification::Invalid(err)),
        };
        let mac = self.mac(remote, &hello)?;
        if !hello.cookie.is_empty() && mac.clone().verify_slice(&hello.cookie).is_ok() {
            trace!(remote = %remote, "ClientHello cookie verified");
            return Ok(HelloVerification::Verified(hello));
        }

        trace!(remote = %remote, cookie_len = hello.cookie.len(), "sending HelloVerifyRequest");
        let cookie = mac.finalize().into_bytes();
        Ok(HelloVerification::HelloVerifyRequest(hello_verify_request(
            &hello, &cookie,
        )))
    }

    /// Cookie expected from `remote` for `hello`.
    pub fn cookie(&self, remote: SocketAddr, hello: &ClientHello) -> Result<[u8; COOKIE_LENGTH]> {
        let mut cookie = [0u8; COOKIE_LENGTH];
        cookie.copy_from_slice(&self.mac(remote, hello)?.finalize().into_bytes());
        Ok(cookie)
    }

    fn mac(&self, remote: SocketAddr, hello: &ClientHello) -> Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret.0).map_err(|e| DtlsError::Crypto {
            reason: e.to_string(),
        })?;
        mac.update(remote.to_string().as_bytes());
        mac.update(&[hello.client_version.major, hello.client_version.minor]);
        mac.update(&hello.random);
        mac.update(&[hello.session_id.len() as u8]);
        mac.update(&hello.session_id);
        Ok(mac)
    }
}

/// Builds a HelloVerifyRequest answering `hello`, reusing its record sequence number.
fn hello_verify_request(hello: &ClientHello, cookie: &[u8]) -> Bytes {
    let mut body = BytesMut::with_capacity(3 + cookie.len());
    body.put_u8(ProtocolVersion::DTLS_1_0.major);
    body.put_u8(ProtocolVersion::DTLS_1_0.minor);
    body.put_u8(cookie.len() as u8);
    body.put_slice(cookie);
    handshake_record(
        HANDSHAKE_HELLO_VERIFY_REQUEST,
        hello.record_sequence,
        hello.message_seq,
        &body,
    )
}
