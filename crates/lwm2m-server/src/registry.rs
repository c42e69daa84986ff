//! Server-side registry of registered clients.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use lwm2m_core::{BindingMode, RegisterRequest, RegistrationUpdate};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A registered client as seen by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    /// Client endpoint name.
    pub endpoint: String,
    /// Id handed out at registration.
    pub registration_id: String,
    /// Transport binding.
    pub binding: BindingMode,
    /// The client sleeps between exchanges.
    pub queue_mode: bool,
    /// Lifetime in seconds.
    pub lifetime: u64,
    /// Time of the first register.
    pub registered_at: Instant,
    /// Time of the last register or update.
    pub last_update: Instant,
}

impl Registration {
    /// New registration stamped with the current time.
    pub fn new(
        endpoint: impl Into<String>,
        registration_id: impl Into<String>,
        binding: BindingMode,
        queue_mode: bool,
        lifetime: u64,
    ) -> Self {
        let now = Instant::now();
        Self {
            endpoint: endpoint.into(),
            registration_id: registration_id.into(),
            binding,
            queue_mode,
            lifetime,
            registered_at: now,
            last_update: now,
        }
    }

    /// Builds the record for an accepted register request.
    pub fn from_request(request: &RegisterRequest, registration_id: impl Into<String>) -> Self {
        Self::new(
            request.endpoint.clone(),
            registration_id,
            request.binding,
            request.queue_mode,
            request.lifetime,
        )
    }

    /// Whether downlink requests to this client go through the queue.
    pub fn uses_queue_mode(&self) -> bool {
        self.queue_mode || self.binding.is_queue_mode()
    }

    /// Instant after which the registration is dead, `grace` included.
    pub fn expires_at(&self, grace: Duration) -> Instant {
        self.last_update + Duration::from_secs(self.lifetime) + grace
    }

    /// True while the last register or update is less than `lifetime + grace` old.
    pub fn is_alive(&self, grace: Duration) -> bool {
        self.expires_at(grace) > Instant::now()
    }
}

/// Observes registry mutations. Invoked synchronously after each change.
pub trait ClientRegistryListener: Send + Sync {
    /// `previous` holds a replaced registration for the same endpoint.
    fn registered(&self, registration: &Registration, previous: Option<&Registration>);
    /// Called after a registration update was applied.
    fn updated(&self, registration: &Registration);
    /// Called after removal, on deregistration or expiry.
    fn unregistered(&self, registration: &Registration);
}

/// Endpoint name to registration.
#[derive(Default)]
pub struct ClientRegistry {
    registrations: DashMap<String, Registration>,
    listeners: RwLock<Vec<Arc<dyn ClientRegistryListener>>>,
}

impl ClientRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn add_listener(&self, listener: Arc<dyn ClientRegistryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Removes a listener by pointer identity.
    pub fn remove_listener(&self, listener: &Arc<dyn ClientRegistryListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Adds or replaces the registration of its endpoint.
    pub fn register(&self, registration: Registration) -> Option<Registration> {
        info!(
            endpoint = %registration.endpoint,
            registration_id = %registration.registration_id,
            queue_mode = registration.uses_queue_mode(),
            "client registered"
        );
        let previous = self
            .registrations
            .insert(registration.endpoint.clone(), registration.clone());
        for listener in self.listeners() {
            listener.registered(&registration, previous.as_ref());
        }
        previous
    }

    /// Applies an update. Returns the updated record, or `None` for an unknown endpoint.
    pub fn update(&self, endpoint: &str, update: &RegistrationUpdate) -> Option<Registration> {
        let updated = {
            let mut entry = self.registrations.get_mut(endpoint)?;
            if let Some(lifetime) = update.lifetime {
                entry.lifetime = lifetime;
            }
            if let Some(binding) = update.binding {
                entry.binding = binding;
            }
            entry.last_update = Instant::now();
            entry.clone()
        };
        debug!(endpoint, "registration updated");
        for listener in self.listeners() {
            listener.updated(&updated);
        }
        Some(updated)
    }

    /// Removes the registration and notifies listeners.
    pub fn unregister(&self, endpoint: &str) -> Option<Registration> {
        let (_, removed) = self.registrations.remove(endpoint)?;
        info!(endpoint, registration_id = %removed.registration_id, "client unregistered");
        for listener in self.listeners() {
            listener.unregistered(&removed);
        }
        Some(removed)
    }

    /// Unregisters every client whose lifetime plus `grace` has elapsed.
    ///
    /// Listeners see the usual `unregistered` call for each removed client.
    pub fn remove_expired(&self, grace: Duration) -> Vec<Registration> {
        let dead: Vec<String> = self
            .registrations
            .iter()
            .filter(|r| !r.is_alive(grace))
            .map(|r| r.endpoint.clone())
            .collect();

        let mut removed = Vec::with_capacity(dead.len());
        for endpoint in dead {
            // An update may have arrived since the scan.
            let Some((_, registration)) = self
                .registrations
                .remove_if(&endpoint, |_, r| !r.is_alive(grace))
            else {
                continue;
            };
            info!(
                endpoint = %endpoint,
                registration_id = %registration.registration_id,
                "registration expired"
            );
            for listener in self.listeners() {
                listener.unregistered(&registration);
            }
            removed.push(registration);
        }
        removed
    }

    /// Runs [`Self::remove_expired`] every `period` until `shutdown` is cancelled.
    pub fn start_cleaner(
        self: &Arc<Self>,
        period: Duration,
        grace: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        registry.remove_expired(grace);
                    }
                }
            }
            debug!("registration cleaner stopped");
        })
    }

    /// Registration of `endpoint`, if any.
    pub fn get(&self, endpoint: &str) -> Option<Registration> {
        self.registrations.get(endpoint).map(|r| r.clone())
    }

    /// Looks up a registration by the id returned to the client.
    pub fn by_registration_id(&self, registration_id: &str) -> Option<Registration> {
        self.registrations
            .iter()
            .find(|r| r.registration_id == registration_id)
            .map(|r| r.clone())
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// True when no client is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn listeners(&self) -> Vec<Arc<dyn ClientRegistryListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
