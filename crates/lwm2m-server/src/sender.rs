//! Downlink delivery with queueing for queue-mode clients.
//!
//! Requests for clients in plain binding are sent right away. Requests for
//! queue-mode clients wait in the [`RequestQueue`] until the client signals it
//! is awake; a single delivery loop per endpoint then drains the queue in
//! order, for as long as the client stays reachable.

use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashSet;
use lwm2m_core::{DownlinkRequest, RequestTicket, Response, SendError, SendOutcome};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::config::QueueConfig;
use crate::error::{DeliveryError, QueueError, Result};
use crate::presence::AwakeTimers;
use crate::queue::{QueuedRequest, RequestQueue, RequestState, SequenceId, SweepReport};
use crate::reachability::{Reachability, ReachabilityTracker};
use crate::registry::{ClientRegistry, ClientRegistryListener, Registration};

/// Sends one downlink request to a client.
#[async_trait]
pub trait DownlinkSender: Send + Sync {
    /// Sends `request` and waits for the answer. `Ok(None)` means no answer within `timeout`.
    async fn send(
        &self,
        registration: &Registration,
        request: DownlinkRequest,
        timeout: Duration,
    ) -> std::result::Result<Option<Response>, SendError>;
}

/// Receives the outcome of each request handed to [`QueuedRequestSender`].
pub trait ResponseListener: Send + Sync {
    /// The client answered.
    fn on_response(&self, endpoint: &str, ticket: &RequestTicket, response: &Response);
    /// The request failed, expired or was dropped.
    fn on_error(&self, endpoint: &str, ticket: &RequestTicket, error: &DeliveryError);
}

/// A request accepted by [`QueuedRequestSender`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// Ticket identifying the request in callbacks.
    pub ticket: RequestTicket,
    /// Sequence holding the request. `None` when it was sent directly.
    pub sequence: Option<SequenceId>,
}

/// Sends downlink requests, queueing them for clients in queue mode.
#[derive(Clone)]
pub struct QueuedRequestSender {
    inner: Arc<SenderInner>,
}

struct SenderInner {
    config: QueueConfig,
    queue: Mutex<RequestQueue>,
    reachability: Arc<ReachabilityTracker>,
    registry: Arc<ClientRegistry>,
    delegate: Arc<dyn DownlinkSender>,
    listeners: RwLock<Vec<Arc<dyn ResponseListener>>>,
    awake: Option<AwakeTimers>,
    /// Endpoints with a running delivery loop.
    delivering: DashSet<String>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
}

impl QueuedRequestSender {
    /// Creates a sender and subscribes it to `registry`.
    pub fn new(
        config: QueueConfig,
        registry: Arc<ClientRegistry>,
        delegate: Arc<dyn DownlinkSender>,
    ) -> Self {
        let reachability = Arc::new(ReachabilityTracker::new());
        let awake = config
            .client_awake_time()
            .map(|awake_time| AwakeTimers::new(reachability.clone(), awake_time));
        let inner = Arc::new(SenderInner {
            config,
            queue: Mutex::new(RequestQueue::new()),
            reachability,
            registry: registry.clone(),
            delegate,
            listeners: RwLock::new(Vec::new()),
            awake,
            delivering: DashSet::new(),
            tasks: TaskTracker::new(),
            shutdown: CancellationToken::new(),
        });
        registry.add_listener(Arc::new(RegistryHook {
            inner: Arc::downgrade(&inner),
        }));
        Self { inner }
    }

    /// Listeners receive every response and error.
    pub fn add_response_listener(&self, listener: Arc<dyn ResponseListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Reachability tracker shared with the presence timers.
    pub fn reachability(&self) -> Arc<ReachabilityTracker> {
        self.inner.reachability.clone()
    }

    /// Queue config.
    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Sends `request` to `endpoint`, or queues it when the client is in queue mode.
    pub fn send(&self, endpoint: &str, request: DownlinkRequest) -> Result<Submission> {
        let registration = self.registration(endpoint)?;
        let ticket = RequestTicket::generate();
        if !registration.uses_queue_mode() {
            self.inner.send_direct(registration, ticket.clone(), request);
            return Ok(Submission {
                ticket,
                sequence: None,
            });
        }

        let sequence = self
            .inner
            .lock_queue()
            .enqueue(self.inner.queued(endpoint, ticket.clone(), request))?;
        SenderInner::try_deliver(&self.inner, endpoint);
        Ok(Submission {
            ticket,
            sequence: Some(sequence),
        })
    }

    /// Queues `request` at the end of an existing sequence of `endpoint`.
    pub fn send_in_sequence(
        &self,
        endpoint: &str,
        request: DownlinkRequest,
        sequence: SequenceId,
    ) -> Result<Submission> {
        self.registration(endpoint)?;
        let ticket = RequestTicket::generate();
        self.inner.lock_queue().enqueue_in_sequence(
            self.inner.queued(endpoint, ticket.clone(), request),
            sequence,
        )?;
        SenderInner::try_deliver(&self.inner, endpoint);
        Ok(Submission {
            ticket,
            sequence: Some(sequence),
        })
    }

    /// Signals that a message arrived from `endpoint`, so it is awake.
    pub fn notify_client_message(&self, endpoint: &str) {
        let queue_mode = self
            .inner
            .registry
            .get(endpoint)
            .is_some_and(|registration| registration.uses_queue_mode());
        if queue_mode {
            SenderInner::client_awake(&self.inner, endpoint);
        }
    }

    /// Snapshot of the requests queued for `endpoint`, in delivery order.
    pub fn queued_requests(&self, endpoint: &str) -> Vec<QueuedRequest> {
        self.inner
            .lock_queue()
            .requests(endpoint)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Runs `f` with exclusive access to the queue, e.g. to reorder or drop entries.
    pub fn with_queue<R>(&self, f: impl FnOnce(&mut RequestQueue) -> R) -> R {
        f(&mut self.inner.lock_queue())
    }

    /// Applies expirations now and reports expired requests to the listeners.
    pub fn sweep_expired(&self) -> SweepReport {
        self.inner.sweep_expired()
    }

    /// Runs [`Self::sweep_expired`] every `sweep_interval` until shutdown.
    pub fn start_sweeper(&self) {
        let inner = self.inner.clone();
        let interval = inner.config.sweep_interval();
        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = inner.shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        inner.sweep_expired();
                    }
                }
            }
            debug!("queue sweeper stopped");
        });
    }

    /// Stops the sweeper and timers, then waits for in-flight deliveries.
    pub async fn shutdown(&self) {
        info!("shutting down queued request sender");
        self.inner.shutdown.cancel();
        if let Some(awake) = &self.inner.awake {
            awake.cancel_all();
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }

    fn registration(&self, endpoint: &str) -> Result<Registration> {
        self.inner
            .registry
            .get(endpoint)
            .ok_or_else(|| QueueError::UnknownClient {
                endpoint: endpoint.to_string(),
            })
    }
}

impl SenderInner {
    fn lock_queue(&self) -> MutexGuard<'_, RequestQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn listeners(&self) -> Vec<Arc<dyn ResponseListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn queued(&self, endpoint: &str, ticket: RequestTicket, request: DownlinkRequest) -> QueuedRequest {
        QueuedRequest::new(
            endpoint,
            ticket,
            request,
            Instant::now(),
            self.config.send_expiration(),
            self.config.keep_expiration(),
        )
    }

    fn notify_response(&self, endpoint: &str, ticket: &RequestTicket, response: &Response) {
        for listener in self.listeners() {
            listener.on_response(endpoint, ticket, response);
        }
    }

    fn notify_error(&self, endpoint: &str, ticket: &RequestTicket, error: &DeliveryError) {
        for listener in self.listeners() {
            listener.on_error(endpoint, ticket, error);
        }
    }

    fn client_awake(this: &Arc<Self>, endpoint: &str) {
        this.reachability.set_client_reachable(endpoint);
        if let Some(awake) = &this.awake {
            awake.client_awake(endpoint);
        }
        Self::try_deliver(this, endpoint);
    }

    /// Starts a delivery loop unless one already owns the endpoint.
    fn try_deliver(this: &Arc<Self>, endpoint: &str) {
        if this.shutdown.is_cancelled() {
            return;
        }
        if this.lock_queue().next_deliverable(endpoint).is_none() {
            return;
        }
        if !this.delivering.insert(endpoint.to_string()) {
            trace!(endpoint, "delivery loop already running");
            return;
        }
        if !this.reachability.start_client_receiving(endpoint) {
            this.delivering.remove(endpoint);
            return;
        }
        let inner = this.clone();
        let endpoint = endpoint.to_string();
        this.tasks.spawn(async move { inner.deliver(endpoint).await });
    }

    async fn deliver(self: Arc<Self>, endpoint: String) {
        debug!(endpoint = %endpoint, "delivery loop started");
        while self.reachability.state(&endpoint).is_awake() {
            // A wake-up signal during a send resets the state to `Reachable`.
            self.reachability.start_client_receiving(&endpoint);
            let next = self.lock_queue().start_processing(&endpoint);
            let Some((ticket, request)) = next else {
                break;
            };
            let Some(registration) = self.registry.get(&endpoint) else {
                break;
            };
            let result = self
                .delegate
                .send(&registration, request, self.config.request_timeout())
                .await;
            self.handle_outcome(&endpoint, &ticket, SendOutcome::classify(result));
        }
        self.reachability.stop_client_receiving(&endpoint);
        self.delivering.remove(&endpoint);
        debug!(endpoint = %endpoint, "delivery loop stopped");

        // A signal that arrived while the loop was finishing found it still running.
        Self::try_deliver(&self, &endpoint);
    }

    fn handle_outcome(&self, endpoint: &str, ticket: &RequestTicket, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Success(response) => self.complete(endpoint, ticket, response),
            SendOutcome::Rejected { code, message } => {
                debug!(endpoint, ticket = %ticket, code = %code, "request rejected by client");
                let response = Response {
                    error_message: message,
                    ..Response::new(code)
                };
                self.complete(endpoint, ticket, response);
            }
            SendOutcome::Timeout => {
                info!(endpoint, ticket = %ticket, "request timed out, client considered asleep");
                if let Err(err) = self
                    .lock_queue()
                    .set_state(endpoint, ticket, RequestState::Deferred)
                {
                    debug!(endpoint, error = %err, "timed out request left the queue");
                }
                if let Some(awake) = &self.awake {
                    awake.cancel(endpoint);
                }
                self.reachability.set_client_unreachable(endpoint);
            }
            SendOutcome::TransportError(err) => {
                warn!(endpoint, ticket = %ticket, "unable to send request: {}", err);
                debug!(endpoint, ticket = %ticket, "unable to send request: {:?}", err);
                self.lock_queue().drop_request(endpoint, ticket);
                self.notify_error(endpoint, ticket, &DeliveryError::Transport(err));
            }
        }
    }

    fn complete(&self, endpoint: &str, ticket: &RequestTicket, response: Response) {
        let removed = {
            let mut queue = self.lock_queue();
            queue
                .set_state(endpoint, ticket, RequestState::Executed)
                .and_then(|_| queue.unqueue_request(endpoint, ticket))
        };
        if let Err(err) = removed {
            debug!(endpoint, error = %err, "answered request left the queue");
        }
        self.notify_response(endpoint, ticket, &response);
    }

    fn send_direct(self: &Arc<Self>, registration: Registration, ticket: RequestTicket, request: DownlinkRequest) {
        let inner = self.clone();
        self.tasks.spawn(async move {
            let timeout = inner.config.request_timeout();
            let result = inner.delegate.send(&registration, request, timeout).await;
            let endpoint = registration.endpoint.as_str();
            match SendOutcome::classify(result) {
                SendOutcome::Success(response) => inner.notify_response(endpoint, &ticket, &response),
                SendOutcome::Rejected { code, message } => {
                    let response = Response {
                        error_message: message,
                        ..Response::new(code)
                    };
                    inner.notify_response(endpoint, &ticket, &response);
                }
                SendOutcome::Timeout => {
                    let error = DeliveryError::Timeout {
                        timeout_ms: inner.config.request_timeout_ms,
                    };
                    inner.notify_error(endpoint, &ticket, &error);
                }
                SendOutcome::TransportError(err) => {
                    warn!(endpoint, ticket = %ticket, "unable to send request: {}", err);
                    debug!(endpoint, ticket = %ticket, "unable to send request: {:?}", err);
                    inner.notify_error(endpoint, &ticket, &DeliveryError::Transport(err));
                }
            }
        });
    }

    fn sweep_expired(&self) -> SweepReport {
        let report = self.lock_queue().sweep_expired(Instant::now());
        for (endpoint, ticket) in &report.expired {
            self.notify_error(endpoint, ticket, &DeliveryError::Expired);
        }
        report
    }

    fn client_gone(&self, endpoint: &str) {
        if let Some(awake) = &self.awake {
            awake.cancel(endpoint);
        }
        self.reachability.clear_client_state(endpoint);
        let dropped = self.lock_queue().remove_all(endpoint);
        if !dropped.is_empty() {
            info!(endpoint, count = dropped.len(), "dropping queued requests of unregistered client");
        }
        let error = DeliveryError::Dropped {
            reason: "client unregistered".to_string(),
        };
        for request in dropped
            .iter()
            .filter(|request| request.state() != RequestState::Executed)
        {
            self.notify_error(endpoint, request.ticket(), &error);
        }
    }
}

struct RegistryHook {
    inner: Weak<SenderInner>,
}

impl ClientRegistryListener for RegistryHook {
    fn registered(&self, registration: &Registration, _previous: Option<&Registration>) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if registration.uses_queue_mode() {
            inner.reachability.set_client_reachable(&registration.endpoint);
            if let Some(awake) = &inner.awake {
                awake.client_awake(&registration.endpoint);
            }
        }
    }

    fn updated(&self, registration: &Registration) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        if registration.uses_queue_mode() {
            SenderInner::client_awake(&inner, &registration.endpoint);
        }
    }

    fn unregistered(&self, registration: &Registration) {
        if let Some(inner) = self.inner.upgrade() {
            inner.client_gone(&registration.endpoint);
        }
    }
}
