//! Reachability of queue-mode clients.

use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use tracing::{debug, trace};

/// Whether a queue-mode client can currently be sent requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reachability {
    /// No signal seen since registration.
    Unknown,
    /// The client is awake.
    Reachable,
    /// The client is awake and a delivery loop is draining its queue.
    Receiving,
    /// The client is asleep.
    Unreachable,
}

impl Reachability {
    /// Awake, with or without a running delivery loop.
    pub fn is_awake(self) -> bool {
        matches!(self, Reachability::Reachable | Reachability::Receiving)
    }
}

/// Notified when a client wakes up or falls asleep.
pub trait PresenceListener: Send + Sync {
    /// The client became reachable.
    fn on_awake(&self, endpoint: &str);
    /// The client went to sleep.
    fn on_sleeping(&self, endpoint: &str);
}

/// Per-endpoint reachability state machine.
#[derive(Default)]
pub struct ReachabilityTracker {
    states: DashMap<String, Reachability>,
    listeners: RwLock<Vec<Arc<dyn PresenceListener>>>,
}

impl ReachabilityTracker {
    /// Tracker with every client `Unknown`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Listeners see every awake and sleeping transition.
    pub fn add_listener(&self, listener: Arc<dyn PresenceListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    /// `Unknown` for endpoints never seen.
    pub fn state(&self, endpoint: &str) -> Reachability {
        self.states
            .get(endpoint)
            .map(|state| *state)
            .unwrap_or(Reachability::Unknown)
    }

    /// Marks the client awake, whatever its previous state.
    pub fn set_client_reachable(&self, endpoint: &str) -> bool {
        let previous = self
            .states
            .insert(endpoint.to_string(), Reachability::Reachable)
            .unwrap_or(Reachability::Unknown);
        trace!(endpoint, ?previous, "client reachable");
        if !previous.is_awake() {
            self.notify(endpoint, true);
        }
        true
    }

    /// Claims the client for a delivery loop. Fails unless it is `Reachable`.
    pub fn start_client_receiving(&self, endpoint: &str) -> bool {
        self.transition(endpoint, Reachability::Reachable, Reachability::Receiving)
    }

    /// Releases the delivery loop claim. Fails unless it is `Receiving`.
    pub fn stop_client_receiving(&self, endpoint: &str) -> bool {
        self.transition(endpoint, Reachability::Receiving, Reachability::Reachable)
    }

    /// Marks the client asleep. Fails when nothing is known about it.
    pub fn set_client_unreachable(&self, endpoint: &str) -> bool {
        let previous = match self.states.get_mut(endpoint) {
            Some(mut state) => {
                let previous = *state;
                if previous == Reachability::Unknown {
                    return false;
                }
                *state = Reachability::Unreachable;
                previous
            }
            None => return false,
        };
        if previous.is_awake() {
            debug!(endpoint, "client sleeping");
            self.notify(endpoint, false);
        }
        true
    }

    /// Forgets the client.
    pub fn clear_client_state(&self, endpoint: &str) {
        self.states.remove(endpoint);
    }

    fn transition(&self, endpoint: &str, from: Reachability, to: Reachability) -> bool {
        match self.states.get_mut(endpoint) {
            Some(mut state) if *state == from => {
                *state = to;
                true
            }
            _ => false,
        }
    }

    fn notify(&self, endpoint: &str, awake: bool) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            if awake {
                listener.on_awake(endpoint);
            } else {
                listener.on_sleeping(endpoint);
            }
        }
    }
}
