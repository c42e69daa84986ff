//! Awake timers for queue-mode clients.
//!
//! A queue-mode client listens for a limited time after each message it sends.
//! Every signal re-arms the endpoint's timer; when it fires the client is
//! marked unreachable.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::reachability::ReachabilityTracker;

struct Timer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// One sleep timer per endpoint. Fired timers remove themselves.
pub struct AwakeTimers {
    tracker: Arc<ReachabilityTracker>,
    awake_time: Duration,
    generation: AtomicU64,
    timers: Arc<DashMap<String, Timer>>,
}

impl AwakeTimers {
    /// Timers that mark clients unreachable after `awake_time`.
    pub fn new(tracker: Arc<ReachabilityTracker>, awake_time: Duration) -> Self {
        Self {
            tracker,
            awake_time,
            generation: AtomicU64::new(0),
            timers: Arc::new(DashMap::new()),
        }
    }

    /// Time a client stays awake after its last message.
    pub fn awake_time(&self) -> Duration {
        self.awake_time
    }

    /// Re-arms the timer of `endpoint`. Must be called within a tokio runtime.
    pub fn client_awake(&self, endpoint: &str) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let tracker = self.tracker.clone();
        let timers = self.timers.clone();
        let awake_time = self.awake_time;
        let name = endpoint.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(awake_time).await;
            debug!(endpoint = %name, "awake time elapsed");
            timers.remove_if(&name, |_, timer| timer.generation == generation);
            tracker.set_client_unreachable(&name);
        });
        let timer = Timer { generation, handle };
        if let Some(previous) = self.timers.insert(endpoint.to_string(), timer) {
            previous.handle.abort();
        }
    }

    /// Stops the endpoint's timer without changing its state.
    pub fn cancel(&self, endpoint: &str) {
        if let Some((_, timer)) = self.timers.remove(endpoint) {
            timer.handle.abort();
        }
    }

    /// Stops every timer.
    pub fn cancel_all(&self) {
        self.timers.retain(|_, timer| {
            timer.handle.abort();
            false
        });
    }

    /// Endpoints with a timer still running.
    pub fn armed(&self) -> usize {
        self.timers
            .iter()
            .filter(|entry| !entry.value().handle.is_finished())
            .count()
    }

    /// Endpoints holding a timer entry, fired or not.
    pub fn tracked(&self) -> usize {
        self.timers.len()
    }
}

impl Drop for AwakeTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
