//! Registration lifecycle engine.
//!
//! Drives one endpoint through bootstrap, registration, periodic update and
//! deregistration. All task bodies run under a single task lock; the started
//! flag and the three task handles (bootstrap, registration, update) sit under
//! a second, short-lived lock.
//!
//! Failover order on errors:
//! update fails -> register; register fails -> client-initiated bootstrap now;
//! bootstrap cannot be scheduled -> registration again after the retry wait.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use lwm2m_core::request::LWM2M_VERSION;
use lwm2m_core::{
    select_server, RegisterRequest, RegistrationUpdate, ResponseCode, SendError, SendOutcome,
    ServerIdentity, UpdateRequest, UplinkRequest,
};
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use crate::bootstrap::{BootstrapSession, SessionGuard};
use crate::config::EngineConfig;
use crate::endpoints::{EndpointsManager, UplinkSender};
use crate::error::{ClientError, Result};
use crate::identity::IdentityTracker;
use crate::object_tree::ObjectTree;
use crate::observer::{ClientObserver, NoopObserver};
use crate::registry::{RegisteringGuard, RegistrationRegistry};
use crate::scheduler::{ScheduledTask, TaskScheduler};
use crate::task::LifecycleTask;

/// Where the engine is in the registration lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Not started, or stopped.
    Stopped,
    /// `start` is resolving the server to use.
    Starting,
    /// A client-initiated bootstrap is in progress.
    Bootstrapping,
    /// A register request is in flight.
    Registering,
    /// Registered; the next update is scheduled.
    Registered,
    /// An update request is in flight.
    Updating,
    /// A deregister request is in flight.
    Deregistering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestStatus {
    Success,
    Failure,
    Timeout,
}

#[derive(Default)]
struct TaskSlots {
    started: bool,
    bootstrap: Option<ScheduledTask>,
    registration: Option<ScheduledTask>,
    update: Option<ScheduledTask>,
}

impl TaskSlots {
    fn cancel_all(&mut self) {
        for task in [
            self.bootstrap.take(),
            self.registration.take(),
            self.update.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.cancel();
        }
    }
}

/// Builds a [`RegistrationEngine`].
pub struct RegistrationEngineBuilder {
    endpoint: String,
    object_tree: Arc<dyn ObjectTree>,
    endpoints: Arc<dyn EndpointsManager>,
    sender: Arc<dyn UplinkSender>,
    config: EngineConfig,
    observer: Arc<dyn ClientObserver>,
    additional_attributes: BTreeMap<String, String>,
    scheduler: Option<Arc<TaskScheduler>>,
}

impl RegistrationEngineBuilder {
    /// Starts a builder with the default config and a no-op observer.
    pub fn new(
        endpoint: impl Into<String>,
        object_tree: Arc<dyn ObjectTree>,
        endpoints: Arc<dyn EndpointsManager>,
        sender: Arc<dyn UplinkSender>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            object_tree,
            endpoints,
            sender,
            config: EngineConfig::default(),
            observer: Arc::new(NoopObserver),
            additional_attributes: BTreeMap::new(),
            scheduler: None,
        }
    }

    /// Replaces the engine config.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Receives every lifecycle notification.
    pub fn observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Extra attributes sent with every registration.
    pub fn additional_attributes(mut self, attributes: BTreeMap<String, String>) -> Self {
        self.additional_attributes = attributes;
        self
    }

    /// Runs tasks on a scheduler shared with other components. The engine
    /// will not shut it down on destroy.
    pub fn scheduler(mut self, scheduler: Arc<TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Validates the configuration and builds the engine.
    ///
    /// Without a shared scheduler the engine owns one on the current tokio runtime.
    pub fn build(self) -> Result<RegistrationEngine> {
        self.config.validate()?;
        let (scheduler, owns_scheduler) = match self.scheduler {
            Some(scheduler) => (scheduler, false),
            None => {
                let runtime = Handle::try_current().map_err(|e| ClientError::InvalidConfig {
                    reason: format!("no tokio runtime for the engine scheduler: {}", e),
                })?;
                (Arc::new(TaskScheduler::new(runtime)), true)
            }
        };
        let (state, _) = watch::channel(EngineState::Stopped);

        Ok(RegistrationEngine {
            inner: Arc::new(EngineInner {
                endpoint: self.endpoint,
                config: self.config,
                additional_attributes: self.additional_attributes,
                object_tree: self.object_tree,
                endpoints: self.endpoints,
                sender: self.sender,
                observer: self.observer,
                bootstrap: Arc::new(BootstrapSession::new()),
                registry: Arc::new(RegistrationRegistry::new()),
                scheduler,
                owns_scheduler,
                task_lock: Mutex::new(()),
                tasks: Mutex::new(TaskSlots::default()),
                state,
            }),
        })
    }
}

/// Client registration engine for one endpoint.
#[derive(Clone)]
pub struct RegistrationEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    endpoint: String,
    config: EngineConfig,
    additional_attributes: BTreeMap<String, String>,
    object_tree: Arc<dyn ObjectTree>,
    endpoints: Arc<dyn EndpointsManager>,
    sender: Arc<dyn UplinkSender>,
    observer: Arc<dyn ClientObserver>,
    bootstrap: Arc<BootstrapSession>,
    registry: Arc<RegistrationRegistry>,
    scheduler: Arc<TaskScheduler>,
    owns_scheduler: bool,
    task_lock: Mutex<()>,
    tasks: Mutex<TaskSlots>,
    state: watch::Sender<EngineState>,
}

impl RegistrationEngine {
    /// Starts the lifecycle.
    ///
    /// Registers with the provisioned management server, or bootstraps when
    /// none is provisioned. Fails only if neither server kind is available.
    pub async fn start(&self) -> Result<()> {
        self.stop(false).await;

        let inner = &self.inner;
        let mut slots = inner.tasks.lock().await;
        slots.started = true;
        inner.set_state(EngineState::Starting);
        info!(endpoint = %inner.endpoint, "starting registration engine");

        if let Some(server) = inner.factory_bootstrap().await {
            info!(endpoint = %inner.endpoint, server = %server, "using factory provisioned server");
            slots.registration = Some(inner.submit(Duration::ZERO, LifecycleTask::Register { server }));
            return Ok(());
        }

        if inner.schedule_bootstrap_locked(&mut slots, Duration::ZERO, false) {
            Ok(())
        } else {
            slots.started = false;
            inner.set_state(EngineState::Stopped);
            error!(endpoint = %inner.endpoint, "no valid server available");
            Err(ClientError::NoServerAvailable)
        }
    }

    /// Stops the lifecycle, optionally deregistering first. Idempotent.
    pub async fn stop(&self, deregister: bool) {
        let inner = &self.inner;
        {
            let mut slots = inner.tasks.lock().await;
            if !slots.started {
                return;
            }
            slots.started = false;
            slots.cancel_all();
        }
        info!(endpoint = %inner.endpoint, deregister, "stopping registration engine");

        if deregister {
            inner.deregister_first_registration().await;
        }
        inner.set_state(EngineState::Stopped);
    }

    /// Stops for good. An engine-owned scheduler is shut down and awaited for
    /// at most the bootstrap session timeout.
    pub async fn destroy(&self, deregister: bool) {
        let inner = &self.inner;
        let was_started = {
            let mut slots = inner.tasks.lock().await;
            let was_started = slots.started;
            slots.started = false;
            slots.cancel_all();
            was_started
        };

        if inner.owns_scheduler {
            let grace = inner.config.bootstrap_session_timeout();
            if !inner.scheduler.shutdown(grace).await {
                warn!(
                    endpoint = %inner.endpoint,
                    grace_secs = grace.as_secs(),
                    "lifecycle tasks still running after shutdown"
                );
            }
        }

        if was_started && deregister {
            inner.deregister_first_registration().await;
        }
        inner.set_state(EngineState::Stopped);
        info!(endpoint = %inner.endpoint, "registration engine destroyed");
    }

    /// Sends an update now instead of waiting for the next periodic one.
    ///
    /// Returns false when the engine is stopped, nothing is registered, or
    /// `server` holds no registration.
    pub async fn trigger_registration_update(
        &self,
        server: Option<ServerIdentity>,
        update: RegistrationUpdate,
    ) -> bool {
        let inner = &self.inner;
        let slots = inner.tasks.lock().await;
        if !slots.started {
            debug!(endpoint = %inner.endpoint, "engine stopped, update not triggered");
            return false;
        }
        if inner.registry.is_empty() {
            info!(endpoint = %inner.endpoint, "No server registered!");
            return false;
        }
        if let Some(server) = &server {
            if inner.registry.registration_id_for(server).is_none() {
                info!(endpoint = %inner.endpoint, server = %server, "server not registered, update not triggered");
                return false;
            }
        }
        inner.submit(Duration::ZERO, LifecycleTask::QueuedUpdate { server, update });
        true
    }

    /// Cancels pending work and bootstraps now, deregistering first if asked.
    ///
    /// Returns false when the engine is stopped or no bootstrap server is provisioned.
    pub async fn trigger_client_initiated_bootstrap(&self, deregister_first: bool) -> bool {
        let inner = &self.inner;
        let mut slots = inner.tasks.lock().await;
        if !slots.started {
            return false;
        }
        if inner.object_tree.servers_info().bootstrap.is_none() {
            warn!(endpoint = %inner.endpoint, "no bootstrap server provisioned");
            return false;
        }
        info!(endpoint = %inner.endpoint, deregister_first, "triggering client-initiated bootstrap");
        slots.cancel_all();
        inner.schedule_bootstrap_locked(&mut slots, Duration::ZERO, deregister_first)
    }

    /// Endpoint name sent in register requests.
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Engine config.
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Id of the current registration.
    pub fn registration_id(&self) -> Option<String> {
        self.inner.registry.first().map(|(id, _)| id)
    }

    /// Server of the current registration.
    pub fn registered_server(&self) -> Option<ServerIdentity> {
        self.inner.registry.first().map(|(_, server)| server)
    }

    /// Latest published state.
    pub fn state(&self) -> EngineState {
        *self.inner.state.borrow()
    }

    /// Receiver that sees every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<EngineState> {
        self.inner.state.subscribe()
    }

    /// True between `start` and `stop`.
    pub async fn is_started(&self) -> bool {
        self.inner.tasks.lock().await.started
    }

    /// Session the bootstrap request handlers signal completion on.
    pub fn bootstrap_session(&self) -> Arc<BootstrapSession> {
        self.inner.bootstrap.clone()
    }

    /// Registrations currently held.
    pub fn registry(&self) -> Arc<RegistrationRegistry> {
        self.inner.registry.clone()
    }

    /// Tracker for deciding which servers may talk to this client.
    pub fn identity_tracker(&self) -> IdentityTracker {
        IdentityTracker::new(self.inner.bootstrap.clone(), self.inner.registry.clone())
    }
}

impl EngineInner {
    fn set_state(&self, state: EngineState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(endpoint = %self.endpoint, from = ?previous, to = ?state, "engine state changed");
        }
    }

    fn submit(self: &Arc<Self>, delay: Duration, task: LifecycleTask) -> ScheduledTask {
        debug!(
            endpoint = %self.endpoint,
            task = task.kind(),
            delay_ms = delay.as_millis() as u64,
            "scheduling task"
        );
        let inner = Arc::clone(self);
        self.scheduler.schedule(delay, inner.run_task(task))
    }

    async fn run_task(self: Arc<Self>, task: LifecycleTask) {
        let kind = task.kind();
        let result = AssertUnwindSafe(self.execute(task)).catch_unwind().await;
        if let Err(panic) = result {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(endpoint = %self.endpoint, task = kind, reason = %reason, "unexpected error in lifecycle task");
            self.observer
                .on_unexpected_error(&ClientError::TaskPanicked { reason });
        }
    }

    async fn execute(self: &Arc<Self>, task: LifecycleTask) {
        let _lock = self.task_lock.lock().await;
        match task {
            LifecycleTask::Bootstrap { deregister_first } => {
                self.bootstrap_task(deregister_first).await
            }
            LifecycleTask::Register { server } => self.registration_task(server).await,
            LifecycleTask::Update {
                server,
                registration_id,
                update,
            } => self.update_task(server, registration_id, update).await,
            LifecycleTask::QueuedUpdate { server, update } => {
                self.queued_update_task(server, update).await
            }
        }
    }

    async fn bootstrap_task(self: &Arc<Self>, deregister_first: bool) {
        if deregister_first {
            for (registration_id, server) in self.registry.snapshot() {
                self.deregister(&server, &registration_id).await;
            }
        }
        match self.client_initiated_bootstrap().await {
            Some(server) => {
                if !self.register_with_retry(&server).await {
                    self.schedule_registration_task(server, self.config.retry_waiting_time())
                        .await;
                }
            }
            None => {
                self.schedule_client_initiated_bootstrap(self.config.retry_waiting_time())
                    .await;
            }
        }
    }

    async fn registration_task(self: &Arc<Self>, server: ServerIdentity) {
        if !self.register_with_retry(&server).await
            && !self.schedule_client_initiated_bootstrap(Duration::ZERO).await
        {
            self.schedule_registration_task(server, self.config.retry_waiting_time())
                .await;
        }
    }

    async fn update_task(
        self: &Arc<Self>,
        server: ServerIdentity,
        registration_id: String,
        update: RegistrationUpdate,
    ) {
        if self
            .update_with_retry(&server, &registration_id, &update)
            .await
        {
            return;
        }
        if !self.register_with_retry(&server).await
            && !self.schedule_client_initiated_bootstrap(Duration::ZERO).await
        {
            self.schedule_registration_task(server, self.config.retry_waiting_time())
                .await;
        }
    }

    async fn queued_update_task(
        self: &Arc<Self>,
        server: Option<ServerIdentity>,
        update: RegistrationUpdate,
    ) {
        let target = match server {
            Some(server) => self
                .registry
                .registration_id_for(&server)
                .map(|id| (id, server)),
            None => self.registry.first(),
        };
        match target {
            Some((registration_id, server)) => {
                self.schedule_update(server, registration_id, update, Duration::ZERO)
                    .await
            }
            // The periodic update, if any, stays scheduled.
            None => info!(endpoint = %self.endpoint, "No server registered!"),
        }
    }

    /// Management server provisioned at the factory, if any.
    async fn factory_bootstrap(&self) -> Option<ServerIdentity> {
        let servers = self.object_tree.servers_info();
        let dm = select_server(&servers)?;
        let server = self.endpoints.create_endpoint(&dm.info).await;
        if server.is_none() {
            warn!(endpoint = %self.endpoint, uri = %dm.info.uri, "unable to create endpoint for factory server");
        }
        server
    }

    /// Runs one bootstrap exchange and returns the management server to register with.
    async fn client_initiated_bootstrap(self: &Arc<Self>) -> Option<ServerIdentity> {
        let servers = self.object_tree.servers_info();
        let Some(bs_info) = servers.bootstrap else {
            error!(endpoint = %self.endpoint, "no bootstrap server provisioned");
            return None;
        };

        if !self.bootstrap.try_init_session(&bs_info) {
            warn!(endpoint = %self.endpoint, "Bootstrap sequence already started.");
            return None;
        }
        let _session = SessionGuard(self.bootstrap.as_ref());

        self.registry.clear();
        self.cancel_registration_task().await;
        self.cancel_update_task().await;
        self.set_state(EngineState::Bootstrapping);

        let Some(server) = self.endpoints.create_endpoint(&bs_info).await else {
            warn!(endpoint = %self.endpoint, uri = %bs_info.uri, "unable to create bootstrap endpoint");
            return None;
        };
        self.bootstrap.set_server(server.clone());

        info!(endpoint = %self.endpoint, server = %server, "trying to start bootstrap session");
        self.observer.on_bootstrap_started(&server);
        let request = UplinkRequest::Bootstrap {
            endpoint: self.endpoint.clone(),
            preferred_content_format: self.config.preferred_content_format,
        };

        match self
            .send(&server, request, self.config.request_timeout())
            .await
        {
            SendOutcome::Success(_) => {
                info!(endpoint = %self.endpoint, "bootstrap started");
                if !self
                    .bootstrap
                    .wait_bootstrap_finished(self.config.bootstrap_session_timeout())
                    .await
                {
                    info!(endpoint = %self.endpoint, server = %server, "bootstrap sequence timed out");
                    self.observer.on_bootstrap_timeout(&server);
                    return None;
                }

                let servers = self.object_tree.servers_info();
                let Some(dm) = select_server(&servers) else {
                    error!(endpoint = %self.endpoint, "bootstrap finished without a management server");
                    self.observer.on_bootstrap_failure(
                        &server,
                        None,
                        Some("no management server provisioned"),
                    );
                    return None;
                };
                info!(endpoint = %self.endpoint, server = %server, "bootstrap finished");
                self.observer.on_bootstrap_success(&server);

                let created = self.endpoints.create_endpoint(&dm.info).await;
                if created.is_none() {
                    warn!(endpoint = %self.endpoint, uri = %dm.info.uri, "unable to create endpoint for provisioned server");
                }
                created
            }
            SendOutcome::Rejected { code, message } => {
                info!(
                    endpoint = %self.endpoint,
                    server = %server,
                    code = %code,
                    message = message.as_deref().unwrap_or(""),
                    "bootstrap failed"
                );
                self.observer
                    .on_bootstrap_failure(&server, Some(code), message.as_deref());
                None
            }
            SendOutcome::Timeout => {
                info!(endpoint = %self.endpoint, server = %server, "bootstrap request timed out");
                self.observer.on_bootstrap_timeout(&server);
                None
            }
            SendOutcome::TransportError(err) => {
                self.log_send_error("bootstrap", &server, &err);
                self.observer
                    .on_bootstrap_failure(&server, None, Some(&err.to_string()));
                None
            }
        }
    }

    async fn register_with_retry(self: &Arc<Self>, server: &ServerIdentity) -> bool {
        match self.register(server).await {
            RequestStatus::Timeout => {
                self.endpoints
                    .force_reconnection(server, self.config.resume_on_connect)
                    .await;
                self.register(server).await == RequestStatus::Success
            }
            status => status == RequestStatus::Success,
        }
    }

    async fn register(self: &Arc<Self>, server: &ServerIdentity) -> RequestStatus {
        let servers = self.object_tree.servers_info();
        let Some(dm) = servers.management(server.server_id()) else {
            error!(endpoint = %self.endpoint, server = %server, "server is no longer provisioned");
            return RequestStatus::Failure;
        };
        let _registering = RegisteringGuard::new(&self.registry, server);

        let request = RegisterRequest {
            endpoint: self.endpoint.clone(),
            lifetime: dm.lifetime,
            lwm2m_version: LWM2M_VERSION.to_string(),
            binding: dm.binding,
            queue_mode: self.config.queue_mode || dm.binding.is_queue_mode(),
            object_links: self.object_tree.object_links(),
            additional_attributes: self.additional_attributes.clone(),
        };

        self.set_state(EngineState::Registering);
        info!(endpoint = %self.endpoint, server = %server, lifetime = dm.lifetime, "trying to register");
        self.observer.on_registration_started(server, &request);

        match self
            .send(
                server,
                UplinkRequest::Register(request.clone()),
                self.config.request_timeout(),
            )
            .await
        {
            SendOutcome::Success(response) => {
                let Some(registration_id) = response.location else {
                    warn!(endpoint = %self.endpoint, server = %server, "registration response without location");
                    self.observer.on_registration_failure(
                        server,
                        &request,
                        Some(response.code),
                        Some("missing registration location"),
                    );
                    return RequestStatus::Failure;
                };
                info!(endpoint = %self.endpoint, server = %server, registration_id = %registration_id, "registered");
                self.registry.insert(&registration_id, server.clone());

                let delay = self.next_update_delay(server, dm.lifetime);
                self.schedule_update(
                    server.clone(),
                    registration_id.clone(),
                    RegistrationUpdate::default(),
                    delay,
                )
                .await;
                self.set_state(EngineState::Registered);
                self.observer
                    .on_registration_success(server, &request, &registration_id);
                RequestStatus::Success
            }
            SendOutcome::Rejected { code, message } => {
                info!(
                    endpoint = %self.endpoint,
                    server = %server,
                    code = %code,
                    message = message.as_deref().unwrap_or(""),
                    "registration failed"
                );
                self.observer
                    .on_registration_failure(server, &request, Some(code), message.as_deref());
                RequestStatus::Failure
            }
            SendOutcome::Timeout => {
                info!(endpoint = %self.endpoint, server = %server, "registration timed out");
                self.observer.on_registration_timeout(server, &request);
                RequestStatus::Timeout
            }
            SendOutcome::TransportError(err) => {
                self.log_send_error("register", server, &err);
                self.observer
                    .on_registration_failure(server, &request, None, Some(&err.to_string()));
                RequestStatus::Failure
            }
        }
    }

    async fn update_with_retry(
        self: &Arc<Self>,
        server: &ServerIdentity,
        registration_id: &str,
        update: &RegistrationUpdate,
    ) -> bool {
        if self.config.reconnect_on_update {
            self.endpoints
                .force_reconnection(server, self.config.resume_on_connect)
                .await;
        }
        let mut status = self.update(server, registration_id, update).await;
        if status == RequestStatus::Timeout {
            self.endpoints
                .force_reconnection(server, self.config.resume_on_connect)
                .await;
            status = self.update(server, registration_id, update).await;
        }
        if status != RequestStatus::Success {
            self.registry.remove(registration_id);
        }
        status == RequestStatus::Success
    }

    async fn update(
        self: &Arc<Self>,
        server: &ServerIdentity,
        registration_id: &str,
        update: &RegistrationUpdate,
    ) -> RequestStatus {
        let servers = self.object_tree.servers_info();
        let Some(dm) = servers.management(server.server_id()) else {
            error!(endpoint = %self.endpoint, server = %server, "server is no longer provisioned");
            return RequestStatus::Failure;
        };

        let request = UpdateRequest {
            registration_id: registration_id.to_string(),
            update: update.clone(),
        };
        self.set_state(EngineState::Updating);
        info!(endpoint = %self.endpoint, server = %server, registration_id, "trying to update registration");
        self.observer.on_update_started(server, &request);

        match self
            .send(
                server,
                UplinkRequest::Update(request.clone()),
                self.config.request_timeout(),
            )
            .await
        {
            SendOutcome::Success(_) => {
                info!(endpoint = %self.endpoint, server = %server, registration_id, "registration updated");
                let lifetime = update.lifetime.unwrap_or(dm.lifetime);
                let delay = self.next_update_delay(server, lifetime);
                self.schedule_update(
                    server.clone(),
                    registration_id.to_string(),
                    RegistrationUpdate::default(),
                    delay,
                )
                .await;
                self.set_state(EngineState::Registered);
                self.observer.on_update_success(server, &request);
                RequestStatus::Success
            }
            SendOutcome::Rejected { code, message } => {
                info!(
                    endpoint = %self.endpoint,
                    server = %server,
                    code = %code,
                    message = message.as_deref().unwrap_or(""),
                    "registration update failed"
                );
                self.observer
                    .on_update_failure(server, &request, Some(code), message.as_deref());
                RequestStatus::Failure
            }
            SendOutcome::Timeout => {
                info!(endpoint = %self.endpoint, server = %server, "registration update timed out");
                self.observer.on_update_timeout(server, &request);
                RequestStatus::Timeout
            }
            SendOutcome::TransportError(err) => {
                self.log_send_error("update", server, &err);
                self.observer
                    .on_update_failure(server, &request, None, Some(&err.to_string()));
                RequestStatus::Failure
            }
        }
    }

    /// Removes the registration. Never retried.
    async fn deregister(self: &Arc<Self>, server: &ServerIdentity, registration_id: &str) -> bool {
        self.set_state(EngineState::Deregistering);
        info!(endpoint = %self.endpoint, server = %server, registration_id, "trying to deregister");
        self.observer.on_deregistration_started(server, registration_id);

        let request = UplinkRequest::Deregister {
            registration_id: registration_id.to_string(),
        };
        match self
            .send(server, request, self.config.deregistration_timeout())
            .await
        {
            SendOutcome::Success(_) => {
                self.registry.remove(registration_id);
                self.cancel_update_task().await;
                info!(endpoint = %self.endpoint, server = %server, "deregistered");
                self.observer.on_deregistration_success(server, registration_id);
                true
            }
            SendOutcome::Rejected {
                code: ResponseCode::NotFound,
                message,
            } => {
                self.registry.remove(registration_id);
                self.cancel_update_task().await;
                info!(endpoint = %self.endpoint, server = %server, "registration already unknown to server");
                self.observer.on_deregistration_failure(
                    server,
                    registration_id,
                    Some(ResponseCode::NotFound),
                    message.as_deref(),
                );
                true
            }
            SendOutcome::Rejected { code, message } => {
                info!(
                    endpoint = %self.endpoint,
                    server = %server,
                    code = %code,
                    message = message.as_deref().unwrap_or(""),
                    "deregistration failed"
                );
                self.observer.on_deregistration_failure(
                    server,
                    registration_id,
                    Some(code),
                    message.as_deref(),
                );
                false
            }
            SendOutcome::Timeout => {
                self.registry.remove(registration_id);
                info!(endpoint = %self.endpoint, server = %server, "deregistration timed out");
                self.observer.on_deregistration_timeout(server, registration_id);
                false
            }
            SendOutcome::TransportError(err) => {
                self.log_send_error("deregister", server, &err);
                self.observer.on_deregistration_failure(
                    server,
                    registration_id,
                    None,
                    Some(&err.to_string()),
                );
                false
            }
        }
    }

    async fn deregister_first_registration(self: &Arc<Self>) {
        if let Some((registration_id, server)) = self.registry.first() {
            self.deregister(&server, &registration_id).await;
        }
    }

    async fn send(
        &self,
        server: &ServerIdentity,
        request: UplinkRequest,
        timeout: Duration,
    ) -> SendOutcome {
        SendOutcome::classify(self.sender.send(server, request, timeout).await)
    }

    fn log_send_error(&self, kind: &str, server: &ServerIdentity, err: &SendError) {
        warn!(endpoint = %self.endpoint, server = %server, request = kind, error = %err, "unable to send request");
        debug!(endpoint = %self.endpoint, request = kind, error = ?err, "send failure details");
    }

    fn next_update_delay(&self, server: &ServerIdentity, lifetime_secs: u64) -> Duration {
        let max = self
            .endpoints
            .max_communication_period(server, Duration::from_secs(lifetime_secs));
        match self.config.communication_period() {
            Some(period) => period.min(max),
            None => max,
        }
    }

    async fn schedule_client_initiated_bootstrap(self: &Arc<Self>, delay: Duration) -> bool {
        let mut slots = self.tasks.lock().await;
        self.schedule_bootstrap_locked(&mut slots, delay, false)
    }

    fn schedule_bootstrap_locked(
        self: &Arc<Self>,
        slots: &mut TaskSlots,
        delay: Duration,
        deregister_first: bool,
    ) -> bool {
        if !slots.started {
            return false;
        }
        if self.object_tree.servers_info().bootstrap.is_none() {
            debug!(endpoint = %self.endpoint, "no bootstrap server provisioned, bootstrap not scheduled");
            return false;
        }
        let pending = slots
            .bootstrap
            .as_ref()
            .is_some_and(|task| !task.is_finished() && !task.is_current());
        if pending {
            debug!(endpoint = %self.endpoint, "bootstrap already scheduled");
        } else {
            slots.bootstrap = Some(self.submit(delay, LifecycleTask::Bootstrap { deregister_first }));
        }
        true
    }

    async fn schedule_registration_task(self: &Arc<Self>, server: ServerIdentity, delay: Duration) {
        let mut slots = self.tasks.lock().await;
        if !slots.started {
            return;
        }
        if let Some(previous) = slots.registration.take() {
            previous.cancel();
        }
        slots.registration = Some(self.submit(delay, LifecycleTask::Register { server }));
    }

    async fn schedule_update(
        self: &Arc<Self>,
        server: ServerIdentity,
        registration_id: String,
        update: RegistrationUpdate,
        delay: Duration,
    ) {
        let mut slots = self.tasks.lock().await;
        if !slots.started {
            return;
        }
        if let Some(previous) = slots.update.take() {
            previous.cancel();
        }
        slots.update = Some(self.submit(
            delay,
            LifecycleTask::Update {
                server,
                registration_id,
                update,
            },
        ));
    }

    async fn cancel_registration_task(&self) {
        if let Some(task) = self.tasks.lock().await.registration.take() {
            task.cancel();
        }
    }

    async fn cancel_update_task(&self) {
        if let Some(task) = self.tasks.lock().await.update.take() {
            task.cancel();
        }
    }
}
