//! In-flight miss table.
//!
//! The first caller that misses on a key becomes the leader and runs the
//! wrapped function. Callers that miss on the same key while the leader is
//! still running become waiters and receive the leader's serialized value.
//!
//! A waiter receives `None` when the leader failed, decided not to share, or
//! was dropped before finishing. In that case the waiter runs the function
//! itself, so errors are never fanned out.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::oneshot;

type Waiters = Vec<oneshot::Sender<Option<Value>>>;

#[derive(Debug, Default)]
pub(crate) struct SingleFlight {
    inflight: DashMap<String, Waiters>,
}

pub(crate) enum Flight {
    Leader(LeaderGuard),
    Waiter(oneshot::Receiver<Option<Value>>),
}

impl SingleFlight {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Joins the flight for `key`, becoming its leader if none is running.
    pub(crate) fn join(self: &Arc<Self>, key: &str) -> Flight {
        match self.inflight.entry(key.to_string()) {
            Entry::Occupied(mut waiting) => {
                let (tx, rx) = oneshot::channel();
                waiting.get_mut().push(tx);
                Flight::Waiter(rx)
            }
            Entry::Vacant(slot) => {
                slot.insert(Vec::new());
                Flight::Leader(LeaderGuard {
                    flight: Arc::clone(self),
                    key: key.to_string(),
                    finished: false,
                })
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn in_flight(&self) -> usize {
        self.inflight.len()
    }
}

/// Held by the leader while it runs. Completing or dropping it clears the
/// in-flight entry.
pub(crate) struct LeaderGuard {
    flight: Arc<SingleFlight>,
    key: String,
    finished: bool,
}

impl LeaderGuard {
    /// Hands `value` to every waiter and releases the key.
    pub(crate) fn complete(mut self, value: Option<Value>) {
        self.finished = true;
        let waiters = self
            .flight
            .inflight
            .remove(&self.key)
            .map(|(_, waiters)| waiters)
            .unwrap_or_default();

        if !waiters.is_empty() {
            tracing::debug!(key = %self.key, waiters = waiters.len(), "fanning out in-flight result");
        }
        for waiter in waiters {
            // a waiter that went away is not an error
            let _ = waiter.send(value.clone());
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        if !self.finished {
            // dropping the senders wakes every waiter with a receive error
            self.flight.inflight.remove(&self.key);
        }
    }
}
