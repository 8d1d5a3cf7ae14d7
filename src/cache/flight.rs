//! Coalescing of concurrent cache misses.
//!
//! The first request for a key becomes the leader and does the work; requests
//! arriving while it runs wait until the leader's guard is dropped, then look
//! at the store again. The guard is released on success, failure, panic or
//! cancellation alike, so waiters are never stranded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

type InFlight = Arc<Mutex<HashMap<String, watch::Receiver<()>>>>;

/// In-flight fetch+transform work, keyed by cache key.
#[derive(Default, Clone)]
pub struct SingleFlight {
    in_flight: InFlight,
}

pub enum Flight {
    /// Caller owns the work for this key until the guard drops.
    Leader(FlightGuard),
    /// Another caller is working on this key.
    Follower(FlightWait),
}

/// Held by the leader. Dropping it wakes every follower.
pub struct FlightGuard {
    key: String,
    in_flight: InFlight,
    // never sent on; closing it is the signal
    _done: watch::Sender<()>,
}

pub struct FlightWait {
    done: watch::Receiver<()>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `key`, or subscribes to the current claim.
    pub fn join(&self, key: &str) -> Flight {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(done) = in_flight.get(key) {
            return Flight::Follower(FlightWait { done: done.clone() });
        }

        let (tx, rx) = watch::channel(());
        in_flight.insert(key.to_string(), rx);
        Flight::Leader(FlightGuard {
            key: key.to_string(),
            in_flight: self.in_flight.clone(),
            _done: tx,
        })
    }

    /// Number of keys currently being produced.
    pub fn len(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FlightWait {
    /// Resolves once the leader's guard has been dropped.
    pub async fn wait(mut self) {
        // Err means the sender is gone, which is the only way this resolves
        let _ = self.done.changed().await;
    }
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        // unregister before `_done` drops so no new follower can subscribe to
        // a finished flight
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}
