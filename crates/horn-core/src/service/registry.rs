//! Registry of open update streams
//!
//! Maps a client id to every live subscriber channel of that client. A client
//! may hold several streams at once (several tabs or devices).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tonic::Status;
use tracing::{debug, warn};

use horn_api::subscribe::TwinfaceSubscribeUpdate;

pub type UpdateSender = mpsc::Sender<Result<TwinfaceSubscribeUpdate, Status>>;

#[derive(Clone)]
struct Subscriber {
    id: u64,
    sender: UpdateSender,
}

/// Result of a broadcast to one client
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub failed: usize,
}

impl BroadcastOutcome {
    pub fn is_delivered(&self) -> bool {
        self.delivered > 0
    }

    fn merge(&mut self, other: BroadcastOutcome) {
        self.delivered += other.delivered;
        self.failed += other.failed;
    }
}

pub struct ConnectionRegistry {
    clients: Arc<DashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            clients: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a stream for `client_id` and return its subscriber id
    pub fn add(&self, client_id: &str, sender: UpdateSender) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.clients
            .entry(client_id.to_string())
            .or_default()
            .push(Subscriber { id, sender });

        debug!(client_id, subscriber_id = id, "Stream registered");
        self.report_active_streams();
        id
    }

    /// Unregister one stream; returns whether it was present
    pub fn remove(&self, client_id: &str, subscriber_id: u64) -> bool {
        let mut removed = false;
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            let before = entry.len();
            entry.retain(|s| s.id != subscriber_id);
            removed = entry.len() != before;
        }
        self.clients
            .remove_if(client_id, |_, subscribers| subscribers.is_empty());

        if removed {
            debug!(client_id, subscriber_id, "Stream unregistered");
            self.report_active_streams();
        }
        removed
    }

    /// Push `update` to every stream of `client_id` without blocking
    pub fn broadcast(&self, client_id: &str, update: &TwinfaceSubscribeUpdate) -> BroadcastOutcome {
        // Snapshot so no shard lock is held while sending
        let subscribers = match self.clients.get(client_id) {
            Some(entry) => entry.value().clone(),
            None => return BroadcastOutcome::default(),
        };

        let mut outcome = BroadcastOutcome::default();
        let mut closed = Vec::new();

        for subscriber in subscribers {
            match subscriber.sender.try_send(Ok(update.clone())) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    outcome.failed += 1;
                    warn!(
                        client_id,
                        subscriber_id = subscriber.id,
                        "Stream buffer full, update dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => {
                    outcome.failed += 1;
                    closed.push(subscriber.id);
                }
            }
        }

        for subscriber_id in closed {
            self.remove(client_id, subscriber_id);
        }

        if outcome.delivered > 0 {
            metrics::counter!("horn_updates_delivered_total").increment(outcome.delivered as u64);
        }
        outcome
    }

    /// Push `update` to every registered client
    pub fn broadcast_all(&self, update: &TwinfaceSubscribeUpdate) -> BroadcastOutcome {
        let mut total = BroadcastOutcome::default();
        for client_id in self.client_ids() {
            total.merge(self.broadcast(&client_id, update));
        }
        total
    }

    /// Terminate every stream with `status` and empty the registry
    pub fn fail_all(&self, status: Status) -> usize {
        let mut terminated = 0;
        for client_id in self.client_ids() {
            if let Some((_, subscribers)) = self.clients.remove(&client_id) {
                for subscriber in subscribers {
                    // The stream ends once this sender is dropped, delivered or not
                    let _ = subscriber.sender.try_send(Err(status.clone()));
                    terminated += 1;
                }
            }
        }

        warn!(
            terminated,
            code = ?status.code(),
            "All streams terminated: {}",
            status.message()
        );
        self.report_active_streams();
        terminated
    }

    /// Drop every stream of one client so they complete
    pub fn close_client(&self, client_id: &str) -> usize {
        let closed = self
            .clients
            .remove(client_id)
            .map(|(_, subscribers)| subscribers.len())
            .unwrap_or(0);
        if closed > 0 {
            debug!(client_id, closed, "Client streams closed");
            self.report_active_streams();
        }
        closed
    }

    pub fn has_subscribers(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .is_some_and(|entry| !entry.is_empty())
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.clients.iter().map(|entry| entry.len()).sum()
    }

    fn client_ids(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    fn report_active_streams(&self) {
        metrics::gauge!("horn_active_streams").set(self.subscriber_count() as f64);
    }
}
