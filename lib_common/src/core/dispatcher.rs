//! # Category-Keyed Broadcast Dispatcher
//!
//! The dispatcher is the fan-out point of the bridge: the poller hands it one
//! message per category per cycle, and it delivers that message to exactly the
//! subscribers registered for that category.
//!
//! ## Core Design Points:
//!
//! 1. **Zero-copy fan-out**: a broadcast wraps the message in an `Arc` once;
//!    every subscriber receives a pointer to the same allocation rather than
//!    its own clone.
//!
//! 2. **Per-category locking**: the category map is built complete at
//!    construction (the category enumeration is closed) and never mutated
//!    afterwards, so only each category's subscriber list needs a lock.
//!    Subscribe, unsubscribe and broadcast are mutually exclusive per
//!    category and never stall another category's broadcast.
//!
//! 3. **Failure containment**: each delivery is attempted independently. A
//!    subscriber whose channel has closed is pruned during the broadcast and
//!    the remaining subscribers still receive the message; nothing propagates
//!    to the caller.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;

use crate::core::category::TelemetryCategory;

/// Identifier handed out per subscription, used to unsubscribe.
pub type ClientId = usize;

/// An internal representation of one subscribed connection: the sending half
/// of its unbounded channel. The session task owning the receiving half does
/// the actual network send, so a broadcast never suspends on a slow peer.
struct ClientHandle {
    id: ClientId,
    sender: mpsc::UnboundedSender<Arc<Value>>,
}

/// Tracks live subscribers per category and delivers each category's messages
/// to exactly its subscribers.
pub struct Dispatcher {
    channels: HashMap<TelemetryCategory, Mutex<Vec<ClientHandle>>>,
    next_id: AtomicUsize,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher with an empty subscriber list for every category.
    pub fn new() -> Self {
        Self {
            channels: TelemetryCategory::ALL
                .iter()
                .map(|category| (*category, Mutex::new(Vec::new())))
                .collect(),
            next_id: AtomicUsize::new(1),
        }
    }

    /// Registers a subscriber under `category` and returns its id together
    /// with the receiving half of its channel.
    pub fn subscribe(
        &self,
        category: TelemetryCategory,
    ) -> (ClientId, mpsc::UnboundedReceiver<Arc<Value>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut clients = self.clients(category);
        clients.push(ClientHandle { id, sender: tx });
        log::info!("Client {} subscribed to {}", id, category);

        (id, rx)
    }

    /// Removes a subscriber from `category`. Idempotent; unknown ids are a
    /// no-op.
    pub fn unsubscribe(&self, category: TelemetryCategory, id: ClientId) {
        let mut clients = self.clients(category);
        let before = clients.len();
        clients.retain(|client| client.id != id);
        if clients.len() < before {
            log::info!("Client {} unsubscribed from {}", id, category);
        }
    }

    /// Delivers `message` to every subscriber of `category` and returns the
    /// number of successful deliveries. Zero subscribers is a no-op. Handles
    /// whose channel has closed are pruned; the other subscribers are
    /// unaffected.
    pub fn broadcast(&self, category: TelemetryCategory, message: Value) -> usize {
        let message = Arc::new(message);
        let mut delivered = 0;

        let mut clients = self.clients(category);
        clients.retain(|client| match client.sender.send(Arc::clone(&message)) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => {
                // Receiver dropped: the session is gone, drop the handle too.
                log::info!("Client {} unreachable, removed from {}", client.id, category);
                false
            }
        });

        delivered
    }

    /// Number of live subscribers currently registered for `category`.
    pub fn subscriber_count(&self, category: TelemetryCategory) -> usize {
        self.clients(category).len()
    }

    fn clients(&self, category: TelemetryCategory) -> std::sync::MutexGuard<'_, Vec<ClientHandle>> {
        self.channels
            .get(&category)
            .expect("dispatcher covers every category")
            .lock()
            .expect("Dispatcher lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_broadcast_without_subscribers_is_a_noop() {
        let dispatcher = Dispatcher::new();
        let delivered = dispatcher.broadcast(TelemetryCategory::EvaUia, json!({"power": 1}));
        assert_eq!(delivered, 0);
    }

    #[test]
    fn test_broadcast_reaches_only_the_category() {
        let dispatcher = Dispatcher::new();
        let (_id_a, mut rx_a) = dispatcher.subscribe(TelemetryCategory::RoverTelemetry);
        let (_id_b, mut rx_b) = dispatcher.subscribe(TelemetryCategory::LtvSignal);

        let delivered = dispatcher.broadcast(TelemetryCategory::RoverTelemetry, json!({"speed": 5}));
        assert_eq!(delivered, 1);

        let message = rx_a.try_recv().unwrap();
        assert_eq!(message["speed"], 5);
        assert!(rx_b.try_recv().is_err());
    }

    #[test]
    fn test_failed_delivery_prunes_only_the_dead_subscriber() {
        let dispatcher = Dispatcher::new();
        let category = TelemetryCategory::Eva1Telemetry;

        let (_alive_id, mut alive_rx) = dispatcher.subscribe(category);
        let (dead_id, dead_rx) = dispatcher.subscribe(category);
        drop(dead_rx); // simulate a vanished connection
        assert_eq!(dispatcher.subscriber_count(category), 2);

        let delivered = dispatcher.broadcast(category, json!({"heart_rate": 80}));
        assert_eq!(delivered, 1);
        assert_eq!(dispatcher.subscriber_count(category), 1);
        assert!(alive_rx.try_recv().is_ok());

        // The dead handle must be gone; unsubscribing it again is a no-op.
        dispatcher.unsubscribe(category, dead_id);
        assert_eq!(dispatcher.subscriber_count(category), 1);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let dispatcher = Dispatcher::new();
        let category = TelemetryCategory::EvaStatus;
        let (id, _rx) = dispatcher.subscribe(category);

        dispatcher.unsubscribe(category, id);
        dispatcher.unsubscribe(category, id);
        assert_eq!(dispatcher.subscriber_count(category), 0);
    }
}
