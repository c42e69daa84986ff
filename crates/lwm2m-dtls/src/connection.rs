//! Per-peer datagram processing.
//!
//! Datagrams from one remote address are appended to a FIFO by whichever task
//! received them. The task that flips the `processing` flag spawns the drain
//! loop on the shared runtime; everyone else just returns. The loop clears the
//! flag when the FIFO is empty and then looks again, so a datagram appended
//! between the last pop and the flag reset is never stranded.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::cookie::{CookieVerifier, HelloVerification};
use crate::error::{DtlsError, Result};
use crate::handshake::{
    ApplicationData, ApplicationDataReceiver, DatagramSink, Handshake, HandshakeFactory,
    HandshakeProgress, SecureSession, TransportContext,
};
use crate::record::is_client_hello;

/// Collaborators shared by every connection of an endpoint.
#[derive(Clone)]
pub struct DtlsServices {
    /// Runtime processing tasks are spawned on.
    pub runtime: Handle,
    /// Where outgoing datagrams go.
    pub sink: Arc<dyn DatagramSink>,
    /// Stateless cookie generator and checker.
    pub verifier: Arc<CookieVerifier>,
    /// Creates handshakes for verified peers.
    pub handshakes: Arc<dyn HandshakeFactory>,
    /// Consumer of decrypted payloads.
    pub receiver: Arc<dyn ApplicationDataReceiver>,
    /// Largest record this connection sends.
    pub mtu: usize,
}

/// Counters of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Datagrams taken off the socket for this peer.
    pub datagrams_received: u64,
    /// HelloVerifyRequests sent.
    pub hello_verify_requests: u64,
    /// Handshakes started after a valid cookie.
    pub handshakes_started: u64,
    /// Handshakes that established a session.
    pub handshakes_completed: u64,
    /// Handshakes that ended in a failure.
    pub handshakes_failed: u64,
    /// Application records decrypted and delivered.
    pub application_received: u64,
    /// Application records encrypted and sent.
    pub application_sent: u64,
    /// Records discarded as invalid or out of state.
    pub datagrams_dropped: u64,
}

#[derive(Default)]
struct Counters {
    datagrams_received: AtomicU64,
    hello_verify_requests: AtomicU64,
    handshakes_started: AtomicU64,
    handshakes_completed: AtomicU64,
    handshakes_failed: AtomicU64,
    application_received: AtomicU64,
    application_sent: AtomicU64,
    datagrams_dropped: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Established {
    session: Box<dyn SecureSession>,
    context: TransportContext,
}

#[derive(Default)]
struct PeerState {
    handshake: Option<Box<dyn Handshake>>,
    established: Option<Established>,
}

/// DTLS state for one remote address.
pub struct DtlsConnection {
    remote: SocketAddr,
    services: DtlsServices,
    incoming: Mutex<VecDeque<Bytes>>,
    processing: AtomicBool,
    state: tokio::sync::Mutex<PeerState>,
    last_activity: Mutex<Instant>,
    counters: Counters,
}

impl DtlsConnection {
    /// Fresh connection with no session.
    pub fn new(remote: SocketAddr, services: DtlsServices) -> Self {
        Self {
            remote,
            services,
            incoming: Mutex::new(VecDeque::new()),
            processing: AtomicBool::new(false),
            state: tokio::sync::Mutex::new(PeerState::default()),
            last_activity: Mutex::new(Instant::now()),
            counters: Counters::default(),
        }
    }

    /// Peer address.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Queues a datagram and makes sure a processing loop will see it. Never blocks.
    pub fn datagram_received(self: &Arc<Self>, datagram: Bytes) {
        bump(&self.counters.datagrams_received);
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Instant::now();
        self.incoming
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(datagram);
        self.try_process();
    }

    fn try_process(self: &Arc<Self>) {
        if self
            .processing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            trace!(remote = %self.remote, "processing submitted");
            let connection = self.clone();
            self.services.runtime.spawn(connection.process_loop());
        } else {
            trace!(remote = %self.remote, "processing already ongoing");
        }
    }

    async fn process_loop(self: Arc<Self>) {
        trace!(remote = %self.remote, "processing started");
        while let Some(datagram) = self.next_datagram() {
            let result = AssertUnwindSafe(self.handle_datagram(&datagram))
                .catch_unwind()
                .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(remote = %self.remote, "unable to handle datagram: {}", err);
                    debug!(remote = %self.remote, "unable to handle datagram: {:?}", err);
                }
                Err(_) => {
                    warn!(remote = %self.remote, "unexpected panic while handling datagram");
                }
            }
        }
        self.processing.store(false, Ordering::Release);
        trace!(remote = %self.remote, "processing stopped");
        if self.pending_datagrams() > 0 {
            self.try_process();
        }
    }

    fn next_datagram(&self) -> Option<Bytes> {
        self.incoming
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    async fn handle_datagram(&self, datagram: &[u8]) -> Result<()> {
        let mut state = self.state.lock().await;

        if is_client_hello(datagram) {
            match self.services.verifier.verify(self.remote, datagram)? {
                HelloVerification::HelloVerifyRequest(reply) => {
                    trace!(remote = %self.remote, "ClientHello not verified");
                    bump(&self.counters.hello_verify_requests);
                    self.services.sink.send_to(&reply, self.remote).await?;
                    return Ok(());
                }
                HelloVerification::Invalid(err) => {
                    bump(&self.counters.datagrams_dropped);
                    return Err(err);
                }
                HelloVerification::Verified(_) => {
                    if state.handshake.is_none() {
                        debug!(remote = %self.remote, "handshake started");
                        bump(&self.counters.handshakes_started);
                        state.established = None;
                        state.handshake = Some(self.services.handshakes.start(self.remote));
                    } else {
                        trace!(remote = %self.remote, "handshake already in progress");
                    }
                }
            }
        }

        if state.handshake.is_some() {
            return self.advance_handshake(&mut state, datagram).await;
        }

        let Some(established) = state.established.as_mut() else {
            trace!(remote = %self.remote, "no session, datagram ignored");
            bump(&self.counters.datagrams_dropped);
            return Ok(());
        };
        if let Some(data) = established.session.decrypt(datagram)? {
            trace!(remote = %self.remote, len = data.len(), "application data received");
            bump(&self.counters.application_received);
            let context = established.context.clone();
            drop(state);
            self.services.receiver.packet_received(ApplicationData {
                data,
                remote: self.remote,
                context,
            });
        }
        Ok(())
    }

    async fn advance_handshake(&self, state: &mut PeerState, datagram: &[u8]) -> Result<()> {
        let Some(handshake) = state.handshake.as_mut() else {
            return Ok(());
        };
        match handshake.on_datagram(datagram) {
            HandshakeProgress::Continue(outgoing) => self.send_all(outgoing).await,
            HandshakeProgress::Complete {
                session,
                context,
                outgoing,
            } => {
                info!(remote = %self.remote, peer = %context, "handshake complete");
                bump(&self.counters.handshakes_completed);
                state.handshake = None;
                state.established = Some(Established { session, context });
                self.send_all(outgoing).await
            }
            HandshakeProgress::Failed { reason } => {
                bump(&self.counters.handshakes_failed);
                state.handshake = None;
                Err(DtlsError::HandshakeFailed { reason })
            }
        }
    }

    async fn send_all(&self, datagrams: Vec<Bytes>) -> Result<()> {
        for datagram in datagrams {
            self.services.sink.send_to(&datagram, self.remote).await?;
        }
        Ok(())
    }

    /// Encrypts and sends `data` over the established session.
    ///
    /// Fails when no handshake completed yet, or when the session was negotiated
    /// with a different identity than `expected`.
    pub async fn send_application_data(
        &self,
        data: &[u8],
        expected: &TransportContext,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(established) = state.established.as_mut() else {
            warn!(remote = %self.remote, "dropping application data, handshake not complete");
            return Err(DtlsError::HandshakeIncomplete {
                remote: self.remote,
            });
        };
        if &established.context != expected {
            warn!(
                remote = %self.remote,
                expected = %expected,
                "dropping application data, transport context mismatch"
            );
            return Err(DtlsError::ContextMismatch {
                remote: self.remote,
            });
        }
        let record = established.session.encrypt(data)?;
        if record.len() > self.services.mtu {
            return Err(DtlsError::DatagramTooLarge {
                size: record.len(),
                mtu: self.services.mtu,
            });
        }
        drop(state);
        self.services.sink.send_to(&record, self.remote).await?;
        bump(&self.counters.application_sent);
        Ok(())
    }

    /// Identity of the established session.
    pub async fn transport_context(&self) -> Option<TransportContext> {
        self.state
            .lock()
            .await
            .established
            .as_ref()
            .map(|established| established.context.clone())
    }

    /// True once a session is established.
    pub async fn is_handshake_complete(&self) -> bool {
        self.state.lock().await.established.is_some()
    }

    /// True while a handshake is running.
    pub async fn is_handshake_in_progress(&self) -> bool {
        self.state.lock().await.handshake.is_some()
    }

    /// True while a processing task is scheduled or running.
    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::Acquire)
    }

    /// Datagrams waiting for the processing task.
    pub fn pending_datagrams(&self) -> usize {
        self.incoming.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Time of the last received datagram.
    pub fn last_activity(&self) -> Instant {
        *self.last_activity.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> ConnectionStats {
        let c = &self.counters;
        ConnectionStats {
            datagrams_received: c.datagrams_received.load(Ordering::Relaxed),
            hello_verify_requests: c.hello_verify_requests.load(Ordering::Relaxed),
            handshakes_started: c.handshakes_started.load(Ordering::Relaxed),
            handshakes_completed: c.handshakes_completed.load(Ordering::Relaxed),
            handshakes_failed: c.handshakes_failed.load(Ordering::Relaxed),
            application_received: c.application_received.load(Ordering::Relaxed),
            application_sent: c.application_sent.load(Ordering::Relaxed),
            datagrams_dropped: c.datagrams_dropped.load(Ordering::Relaxed),
        }
    }
}
