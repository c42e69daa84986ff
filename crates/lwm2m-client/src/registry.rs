//! Registrations currently held by the client.

use std::sync::{Arc, RwLock};

use dashmap::{DashMap, DashSet};
use lwm2m_core::ServerIdentity;
use tracing::debug;

/// Notified synchronously after each registry mutation.
#[allow(unused_variables)]
pub trait RegistrationListener: Send + Sync {
    /// A server accepted a registration.
    fn on_registered(&self, registration_id: &str, server: &ServerIdentity) {}
    /// A registration was removed.
    fn on_deregistered(&self, registration_id: &str, server: &ServerIdentity) {}
}

/// Registration id to server map, plus the servers a registration is in flight with.
#[derive(Default)]
pub struct RegistrationRegistry {
    registrations: DashMap<String, ServerIdentity>,
    registering: DashSet<ServerIdentity>,
    listeners: RwLock<Vec<Arc<dyn RegistrationListener>>>,
}

impl RegistrationRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a listener.
    pub fn add_listener(&self, listener: Arc<dyn RegistrationListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// Removes a listener by pointer identity.
    pub fn remove_listener(&self, listener: &Arc<dyn RegistrationListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    fn listeners(&self) -> Vec<Arc<dyn RegistrationListener>> {
        self.listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Records a successful registration.
    pub fn insert(&self, registration_id: &str, server: ServerIdentity) {
        debug!(registration_id, server = %server, "registration recorded");
        self.registrations
            .insert(registration_id.to_string(), server.clone());
        for listener in self.listeners() {
            listener.on_registered(registration_id, &server);
        }
    }

    /// Removes a registration, returning its server.
    pub fn remove(&self, registration_id: &str) -> Option<ServerIdentity> {
        let (id, server) = self.registrations.remove(registration_id)?;
        debug!(registration_id = %id, server = %server, "registration removed");
        for listener in self.listeners() {
            listener.on_deregistered(&id, &server);
        }
        Some(server)
    }

    /// Removes every registration.
    pub fn clear(&self) {
        for (id, _) in self.snapshot() {
            self.remove(&id);
        }
    }

    /// Server holding the registration, if any.
    pub fn get(&self, registration_id: &str) -> Option<ServerIdentity> {
        self.registrations
            .get(registration_id)
            .map(|entry| entry.value().clone())
    }

    /// Any registration. With a single management server there is at most one.
    pub fn first(&self) -> Option<(String, ServerIdentity)> {
        self.registrations
            .iter()
            .next()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
    }

    /// Registration id held with `server`.
    pub fn registration_id_for(&self, server: &ServerIdentity) -> Option<String> {
        self.registrations
            .iter()
            .find(|entry| entry.value() == server)
            .map(|entry| entry.key().clone())
    }

    /// True if `server` holds a registration.
    pub fn is_registered(&self, server: &ServerIdentity) -> bool {
        self.registrations.iter().any(|entry| entry.value() == server)
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Point-in-time copy of all registrations.
    pub fn snapshot(&self) -> Vec<(String, ServerIdentity)> {
        self.registrations
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Marks a register request in flight.
    pub fn add_registering(&self, server: &ServerIdentity) {
        self.registering.insert(server.clone());
    }

    /// Clears the in-flight register marker.
    pub fn remove_registering(&self, server: &ServerIdentity) {
        self.registering.remove(server);
    }

    /// Returns true while a register request to `server` is in flight.
    pub fn is_registering(&self, server: &ServerIdentity) -> bool {
        self.registering.contains(server)
    }
}

/// Clears the registering mark when dropped.
pub(crate) struct RegisteringGuard<'a> {
    registry: &'a RegistrationRegistry,
    server: ServerIdentity,
}

impl<'a> RegisteringGuard<'a> {
    pub(crate) fn new(registry: &'a RegistrationRegistry, server: &ServerIdentity) -> Self {
        registry.add_registering(server);
        Self {
            registry,
            server: server.clone(),
        }
    }
}

impl Drop for RegisteringGuard<'_> {
    fn drop(&mut self) {
        self.registry.remove_registering(&self.server);
    }
}
