//! Common test utilities and fixtures for delivery tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lwm2m_core::{
    BindingMode, DownlinkOperation, DownlinkRequest, RequestTicket, Response, ResponseCode,
    SendError,
};
use lwm2m_server::{
    ClientRegistry, DeliveryError, DownlinkSender, QueueConfig, QueuedRequestSender, Registration,
    ResponseListener,
};

pub const EP: &str = "dev-1";

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Lets spawned delivery tasks run to completion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Response),
    Timeout,
    Fail,
}

/// Downlink sender answering from a script, `2.05 CONTENT` by default.
#[derive(Default)]
pub struct MockDownlink {
    sent: Mutex<Vec<(String, String)>>,
    script: Mutex<VecDeque<Scripted>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDownlink {
    /// Delays every answer by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn script(&self, outcome: Scripted) {
        self.script.lock().unwrap().push_back(outcome);
    }

    /// Paths sent so far, in order.
    pub fn sent_paths(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, path)| path.clone())
            .collect()
    }
}

#[async_trait]
impl DownlinkSender for MockDownlink {
    async fn send(
        &self,
        registration: &Registration,
        request: DownlinkRequest,
        _timeout: Duration,
    ) -> Result<Option<Response>, SendError> {
        self.sent
            .lock()
            .unwrap()
            .push((registration.endpoint.clone(), request.path.clone()));
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let scripted = self.script.lock().unwrap().pop_front();
        match scripted.unwrap_or(Scripted::Respond(Response::new(ResponseCode::Content))) {
            Scripted::Respond(response) => Ok(Some(response)),
            Scripted::Timeout => Ok(None),
            Scripted::Fail => Err(SendError::ConnectionReset),
        }
    }
}

/// Response listener logging `response:<ticket>:<code>` and `error:<ticket>:<kind>`.
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }
}

impl ResponseListener for RecordingListener {
    fn on_response(&self, _endpoint: &str, ticket: &RequestTicket, response: &Response) {
        self.events
            .lock()
            .unwrap()
            .push(format!("response:{}:{}", ticket, response.code.name()));
    }

    fn on_error(&self, _endpoint: &str, ticket: &RequestTicket, error: &DeliveryError) {
        let kind = match error {
            DeliveryError::Timeout { .. } => "timeout",
            DeliveryError::Expired => "expired",
            DeliveryError::Dropped { .. } => "dropped",
            DeliveryError::Transport(_) => "transport",
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("error:{}:{}", ticket, kind));
    }
}

pub fn read(path: &str) -> DownlinkRequest {
    DownlinkRequest::new(DownlinkOperation::Read, path)
}

/// Sender wired to mocks, without awake timers unless the config sets one.
pub struct Harness {
    pub registry: Arc<ClientRegistry>,
    pub downlink: Arc<MockDownlink>,
    pub listener: Arc<RecordingListener>,
    pub sender: QueuedRequestSender,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(QueueConfig {
            client_awake_time_ms: None,
            ..QueueConfig::default()
        })
    }

    pub fn with_config(config: QueueConfig) -> Self {
        init_tracing();
        let registry = Arc::new(ClientRegistry::new());
        let downlink = Arc::new(MockDownlink::default());
        let listener = Arc::new(RecordingListener::default());
        let sender = QueuedRequestSender::new(config, registry.clone(), downlink.clone());
        sender.add_response_listener(listener.clone());
        Self {
            registry,
            downlink,
            listener,
            sender,
        }
    }

    pub fn register_queue_client(&self) {
        self.registry
            .register(Registration::new(EP, "reg-1", BindingMode::UdpQueue, true, 300));
    }

    pub fn register_plain_client(&self) {
        self.registry
            .register(Registration::new(EP, "reg-1", BindingMode::Udp, false, 300));
    }

    /// Registers a queue-mode client and puts it to sleep.
    pub fn sleeping_queue_client(&self) {
        self.register_queue_client();
        assert!(self.sender.reachability().set_client_unreachable(EP));
    }
}
