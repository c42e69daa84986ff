//! Common test utilities and fixtures for DTLS processing tests.
//!
//! The mock handshake treats any verified ClientHello as the first flight and
//! completes on a datagram starting with `finished`. The mock session frames
//! application data as `app:<payload>`.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use lwm2m_dtls::{
    is_client_hello, ApplicationData, ApplicationDataReceiver, ClientHello, CookieVerifier,
    DatagramSink, DtlsConnection, DtlsError, DtlsServices, Handshake, HandshakeFactory,
    HandshakeProgress, ProtocolVersion, SecureSession, TransportContext,
};
use tokio::runtime::Handle;

pub const PRINCIPAL: &str = "dev-1";
pub const CIPHER: &str = "TLS_PSK_WITH_AES_128_CCM_8";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn remote() -> SocketAddr {
    "192.0.2.10:50000".parse().unwrap()
}

pub fn context() -> TransportContext {
    TransportContext::new(PRINCIPAL, CIPHER)
}

pub fn hello(cookie: &[u8]) -> ClientHello {
    ClientHello {
        record_sequence: 0,
        message_seq: 0,
        client_version: ProtocolVersion::DTLS_1_2,
        random: [42u8; 32],
        session_id: Bytes::new(),
        cookie: Bytes::copy_from_slice(cookie),
        tail: Bytes::from_static(&[0x00, 0x02, 0xc0, 0xa8, 0x01, 0x00]),
    }
}

/// Polls `condition` until it holds, for at most five seconds.
pub async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..2500 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<(SocketAddr, Bytes)>>,
}

impl RecordingSink {
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, datagram)| datagram.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl DatagramSink for RecordingSink {
    async fn send_to(&self, datagram: &[u8], remote: SocketAddr) -> std::io::Result<usize> {
        self.sent
            .lock()
            .unwrap()
            .push((remote, Bytes::copy_from_slice(datagram)));
        Ok(datagram.len())
    }
}

pub struct PrefixSession;

impl SecureSession for PrefixSession {
    fn decrypt(&mut self, datagram: &[u8]) -> Result<Option<Bytes>, DtlsError> {
        if let Some(payload) = datagram.strip_prefix(b"app:".as_slice()) {
            return Ok(Some(Bytes::copy_from_slice(payload)));
        }
        if datagram.starts_with(b"corrupt") {
            return Err(DtlsError::Crypto {
                reason: "bad record MAC".to_string(),
            });
        }
        Ok(None)
    }

    fn encrypt(&mut self, data: &[u8]) -> Result<Bytes, DtlsError> {
        let mut record = b"app:".to_vec();
        record.extend_from_slice(data);
        Ok(Bytes::from(record))
    }
}

struct MockHandshake;

impl Handshake for MockHandshake {
    fn on_datagram(&mut self, datagram: &[u8]) -> HandshakeProgress {
        if datagram.starts_with(b"finished") {
            HandshakeProgress::Complete {
                session: Box::new(PrefixSession),
                context: context(),
                outgoing: vec![Bytes::from_static(b"server-finished")],
            }
        } else if datagram.starts_with(b"fail") {
            HandshakeProgress::Failed {
                reason: "unknown PSK identity".to_string(),
            }
        } else if is_client_hello(datagram) {
            HandshakeProgress::Continue(vec![Bytes::from_static(b"server-hello")])
        } else {
            HandshakeProgress::Continue(Vec::new())
        }
    }
}

#[derive(Default)]
pub struct MockHandshakes {
    started: AtomicUsize,
}

impl MockHandshakes {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl HandshakeFactory for MockHandshakes {
    fn start(&self, _remote: SocketAddr) -> Box<dyn Handshake> {
        self.started.fetch_add(1, Ordering::SeqCst);
        Box::new(MockHandshake)
    }
}

/// Receiver recording payloads and the highest number of concurrent calls.
#[derive(Default)]
pub struct RecordingReceiver {
    packets: Mutex<Vec<ApplicationData>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    hold: Option<Duration>,
}

impl RecordingReceiver {
    /// Receiver that blocks for `hold` inside each call.
    pub fn holding(hold: Duration) -> Self {
        Self {
            hold: Some(hold),
            ..Self::default()
        }
    }

    pub fn payloads(&self) -> Vec<String> {
        self.packets
            .lock()
            .unwrap()
            .iter()
            .map(|packet| String::from_utf8_lossy(&packet.data).into_owned())
            .collect()
    }

    pub fn packets(&self) -> Vec<ApplicationData> {
        self.packets.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.packets.lock().unwrap().len()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

impl ApplicationDataReceiver for RecordingReceiver {
    fn packet_received(&self, data: ApplicationData) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(hold) = self.hold {
            std::thread::sleep(hold);
        }
        self.packets.lock().unwrap().push(data);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A connection wired to mocks.
pub struct Peer {
    pub connection: Arc<DtlsConnection>,
    pub sink: Arc<RecordingSink>,
    pub handshakes: Arc<MockHandshakes>,
    pub receiver: Arc<RecordingReceiver>,
    pub verifier: Arc<CookieVerifier>,
}

impl Peer {
    pub fn new() -> Self {
        Self::with(RecordingReceiver::default(), 1500)
    }

    pub fn with(receiver: RecordingReceiver, mtu: usize) -> Self {
        init_tracing();
        let sink = Arc::new(RecordingSink::default());
        let handshakes = Arc::new(MockHandshakes::default());
        let receiver = Arc::new(receiver);
        let verifier = Arc::new(CookieVerifier::new());
        let services = DtlsServices {
            runtime: Handle::current(),
            sink: sink.clone(),
            verifier: verifier.clone(),
            handshakes: handshakes.clone(),
            receiver: receiver.clone(),
            mtu,
        };
        Self {
            connection: Arc::new(DtlsConnection::new(remote(), services)),
            sink,
            handshakes,
            receiver,
            verifier,
        }
    }

    pub fn receive(&self, datagram: impl Into<Bytes>) {
        self.connection.datagram_received(datagram.into());
    }

    /// Waits until every queued datagram was handled.
    pub async fn drained(&self) {
        let connection = self.connection.clone();
        assert!(
            wait_until(move || connection.pending_datagrams() == 0 && !connection.is_processing())
                .await
        );
    }

    pub fn verified_hello(&self) -> Bytes {
        let cookie = self.verifier.cookie(remote(), &hello(&[])).unwrap();
        hello(&cookie).to_datagram()
    }

    /// Runs the cookie exchange and the mock handshake to completion.
    pub async fn establish(&self) {
        self.receive(self.verified_hello());
        self.receive(Bytes::from_static(b"finished"));
        self.drained().await;
        assert!(self.connection.is_handshake_complete().await);
    }
}
