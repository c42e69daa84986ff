//! Common test utilities and fixtures for engine integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lwm2m_client::{
    ClientError, ClientObserver, EndpointsManager, EngineConfig, EngineState, InMemoryObjectTree,
    RegistrationEngine, RegistrationEngineBuilder, UplinkSender,
};
use lwm2m_core::{
    BindingMode, DmServerInfo, Link, RegisterRequest, Response, ResponseCode, SendError,
    ServerIdentity, ServerInfo, ServersInfo, UpdateRequest, UplinkRequest,
};

/// Installs a test subscriber once; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the mock sender answers to the next request of a kind.
#[derive(Debug, Clone)]
pub enum Scripted {
    Respond(Response),
    Timeout,
    Fail,
}

type BootstrapHook = Box<dyn Fn() + Send + Sync>;

/// Uplink sender answering from per-kind scripts, with defaults when a script is empty.
pub struct MockSender {
    sent: Mutex<Vec<(ServerIdentity, UplinkRequest)>>,
    scripts: Mutex<HashMap<&'static str, VecDeque<Scripted>>>,
    next_registration: AtomicU64,
    bootstrap_hook: Mutex<Option<BootstrapHook>>,
}

impl Default for MockSender {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            next_registration: AtomicU64::new(42),
            bootstrap_hook: Mutex::new(None),
        }
    }
}

impl MockSender {
    pub fn script(&self, kind: &'static str, outcome: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(outcome);
    }

    /// Runs `hook` every time a bootstrap request is answered successfully.
    pub fn on_bootstrap(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.bootstrap_hook.lock().unwrap() = Some(Box::new(hook));
    }

    pub fn sent(&self) -> Vec<(ServerIdentity, UplinkRequest)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.kind())
            .collect()
    }

    pub fn last_sent(&self) -> Option<(ServerIdentity, UplinkRequest)> {
        self.sent.lock().unwrap().last().cloned()
    }

    fn default_outcome(&self, kind: &str) -> Scripted {
        match kind {
            "register" => {
                let id = self.next_registration.fetch_add(1, Ordering::SeqCst);
                Scripted::Respond(Response::created(format!("reg-{}", id)))
            }
            "update" => Scripted::Respond(Response::new(ResponseCode::Changed)),
            "deregister" => Scripted::Respond(Response::new(ResponseCode::Deleted)),
            _ => Scripted::Respond(Response::new(ResponseCode::Changed)),
        }
    }
}

#[async_trait]
impl UplinkSender for MockSender {
    async fn send(
        &self,
        server: &ServerIdentity,
        request: UplinkRequest,
        _timeout: Duration,
    ) -> Result<Option<Response>, SendError> {
        let kind = request.kind();
        self.sent.lock().unwrap().push((server.clone(), request));
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(kind)
            .and_then(|queue| queue.pop_front());
        let outcome = scripted.unwrap_or_else(|| self.default_outcome(kind));

        match outcome {
            Scripted::Respond(response) => {
                if kind == "bootstrap" && response.is_success() {
                    if let Some(hook) = self.bootstrap_hook.lock().unwrap().as_ref() {
                        hook();
                    }
                }
                Ok(Some(response))
            }
            Scripted::Timeout => Ok(None),
            Scripted::Fail => Err(SendError::ConnectionRefused {
                addr: server.uri().to_string(),
            }),
        }
    }
}

/// Endpoints manager handing out fresh connection ids.
pub struct MockEndpoints {
    next_connection: AtomicU64,
    reconnections: Mutex<Vec<(ServerIdentity, bool)>>,
    fail_creation: AtomicBool,
}

impl Default for MockEndpoints {
    fn default() -> Self {
        Self {
            next_connection: AtomicU64::new(1),
            reconnections: Mutex::new(Vec::new()),
            fail_creation: AtomicBool::new(false),
        }
    }
}

impl MockEndpoints {
    pub fn reconnections(&self) -> Vec<(ServerIdentity, bool)> {
        self.reconnections.lock().unwrap().clone()
    }

    pub fn set_fail_creation(&self, fail: bool) {
        self.fail_creation.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EndpointsManager for MockEndpoints {
    async fn create_endpoint(&self, info: &ServerInfo) -> Option<ServerIdentity> {
        if self.fail_creation.load(Ordering::SeqCst) {
            return None;
        }
        let connection = self.next_connection.fetch_add(1, Ordering::SeqCst);
        Some(if info.bootstrap {
            ServerIdentity::bootstrap(connection, info.uri.clone())
        } else {
            ServerIdentity::management(connection, info.server_id, info.uri.clone())
        })
    }

    async fn force_reconnection(&self, server: &ServerIdentity, resume: bool) {
        self.reconnections
            .lock()
            .unwrap()
            .push((server.clone(), resume));
    }
}

/// Observer keeping a log of event names.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl RecordingObserver {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn has(&self, event: &str) -> bool {
        self.events.lock().unwrap().iter().any(|e| e == event)
    }

    fn push(&self, event: impl Into<String>) {
        self.events.lock().unwrap().push(event.into());
    }
}

impl ClientObserver for RecordingObserver {
    fn on_bootstrap_started(&self, _server: &ServerIdentity) {
        self.push("bootstrap_started");
    }

    fn on_bootstrap_success(&self, _server: &ServerIdentity) {
        self.push("bootstrap_success");
    }

    fn on_bootstrap_failure(
        &self,
        _server: &ServerIdentity,
        _code: Option<ResponseCode>,
        _message: Option<&str>,
    ) {
        self.push("bootstrap_failure");
    }

    fn on_bootstrap_timeout(&self, _server: &ServerIdentity) {
        self.push("bootstrap_timeout");
    }

    fn on_registration_success(
        &self,
        _server: &ServerIdentity,
        _request: &RegisterRequest,
        registration_id: &str,
    ) {
        self.push(format!("registration_success:{}", registration_id));
    }

    fn on_registration_failure(
        &self,
        _server: &ServerIdentity,
        _request: &RegisterRequest,
        _code: Option<ResponseCode>,
        _message: Option<&str>,
    ) {
        self.push("registration_failure");
    }

    fn on_registration_timeout(&self, _server: &ServerIdentity, _request: &RegisterRequest) {
        self.push("registration_timeout");
    }

    fn on_update_success(&self, _server: &ServerIdentity, _request: &UpdateRequest) {
        self.push("update_success");
    }

    fn on_update_failure(
        &self,
        _server: &ServerIdentity,
        _request: &UpdateRequest,
        _code: Option<ResponseCode>,
        _message: Option<&str>,
    ) {
        self.push("update_failure");
    }

    fn on_update_timeout(&self, _server: &ServerIdentity, _request: &UpdateRequest) {
        self.push("update_timeout");
    }

    fn on_deregistration_success(&self, _server: &ServerIdentity, registration_id: &str) {
        self.push(format!("deregistration_success:{}", registration_id));
    }

    fn on_deregistration_failure(
        &self,
        _server: &ServerIdentity,
        _registration_id: &str,
        code: Option<ResponseCode>,
        _message: Option<&str>,
    ) {
        match code {
            Some(code) => self.push(format!("deregistration_failure:{}", code.name())),
            None => self.push("deregistration_failure"),
        }
    }

    fn on_deregistration_timeout(&self, _server: &ServerIdentity, _registration_id: &str) {
        self.push("deregistration_timeout");
    }

    fn on_unexpected_error(&self, _error: &ClientError) {
        self.push("unexpected_error");
    }
}

/// Management servers with a 300 s lifetime over plain UDP.
pub fn dm_servers(ids: &[u64]) -> ServersInfo {
    ids.iter().fold(ServersInfo::default(), |servers, id| {
        servers.with_management(DmServerInfo::new(
            *id,
            format!("coap://dm-{}:5683", id),
            300,
            BindingMode::Udp,
        ))
    })
}

pub fn bootstrap_only() -> ServersInfo {
    ServersInfo::default().with_bootstrap(ServerInfo::bootstrap("coaps://bs:5684"))
}

/// Engine wired to mocks.
pub struct Harness {
    pub engine: RegistrationEngine,
    pub sender: Arc<MockSender>,
    pub endpoints: Arc<MockEndpoints>,
    pub tree: Arc<InMemoryObjectTree>,
    pub observer: Arc<RecordingObserver>,
}

impl Harness {
    pub fn new(servers: ServersInfo, config: EngineConfig) -> Self {
        Self::with_builder(servers, |builder| builder.config(config))
    }

    pub fn with_builder(
        servers: ServersInfo,
        customize: impl FnOnce(RegistrationEngineBuilder) -> RegistrationEngineBuilder,
    ) -> Self {
        init_tracing();
        let sender = Arc::new(MockSender::default());
        let endpoints = Arc::new(MockEndpoints::default());
        let tree = Arc::new(InMemoryObjectTree::new(
            servers,
            vec![Link::new("/1/0"), Link::new("/3/0")],
        ));
        let observer = Arc::new(RecordingObserver::default());
        let builder = RegistrationEngineBuilder::new(
            "dev-1",
            tree.clone(),
            endpoints.clone(),
            sender.clone(),
        )
        .observer(observer.clone());
        let engine = customize(builder).build().expect("engine builds");
        Self {
            engine,
            sender,
            endpoints,
            tree,
            observer,
        }
    }

    /// Makes every successful bootstrap provision `servers` and finish after `delay`.
    pub fn finish_bootstrap_with(&self, servers: ServersInfo, delay: Duration) {
        let session = self.engine.bootstrap_session();
        let tree = self.tree.clone();
        self.sender.on_bootstrap(move || {
            let session = session.clone();
            let tree = tree.clone();
            let servers = servers.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                tree.set_servers_info(servers);
                session.bootstrap_finished().expect("session open");
            });
        });
    }

    /// Waits until the engine reaches `state`, up to 30 s of (virtual) time.
    pub async fn wait_for_state(&self, state: EngineState) -> bool {
        let mut rx = self.engine.subscribe_state();
        let reached = tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == state))
            .await
            .is_ok();
        reached
    }
}
