//! Notification Sinks
//!
//! Fan-out of cache-change events to consumers. Two built-in sinks:
//!
//! - [`PushNotifier`]: targeted delivery to registered subscribers, each
//!   watching an explicit set of resource URIs over a private channel.
//! - [`CategoryBroadcaster`]: one tokio broadcast channel per family for
//!   consumers that want everything in a category.
//!
//! [`FanoutNotifier`] composes any number of sinks behind one
//! [`NotificationSink`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc};

use crate::application::ports::NotificationSink;
use crate::domain::resource::{Family, ResourceUri};
use crate::infrastructure::config::BroadcastSettings;

/// A resource's cached payload changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceUpdated {
    /// Family the resource belongs to.
    pub family: Family,
    /// URI of the updated resource.
    pub uri: ResourceUri,
}

// =============================================================================
// Push Notifier
// =============================================================================

/// Identifier of one registered push subscriber.
pub type SubscriberId = u64;

struct PushSubscriber {
    watched: HashSet<ResourceUri>,
    tx: mpsc::UnboundedSender<ResourceUpdated>,
}

/// Targeted push notifications.
///
/// Subscribers register for a private channel, then watch individual resource
/// URIs. Subscribers whose channel has been dropped are pruned on the next
/// delivery attempt.
#[derive(Default)]
pub struct PushNotifier {
    next_id: AtomicU64,
    subscribers: RwLock<HashMap<SubscriberId, PushSubscriber>>,
}

impl PushNotifier {
    /// Create an empty notifier.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber, returning its id and event channel.
    pub fn register(&self) -> (SubscriberId, mpsc::UnboundedReceiver<ResourceUpdated>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.write().insert(
            id,
            PushSubscriber {
                watched: HashSet::new(),
                tx,
            },
        );
        (id, rx)
    }

    /// Start delivering updates for a URI to a subscriber.
    pub fn watch(&self, subscriber: SubscriberId, uri: ResourceUri) {
        if let Some(entry) = self.subscribers.write().get_mut(&subscriber) {
            entry.watched.insert(uri);
        }
    }

    /// Stop delivering updates for a URI to a subscriber.
    pub fn unwatch(&self, subscriber: SubscriberId, uri: &ResourceUri) {
        if let Some(entry) = self.subscribers.write().get_mut(&subscriber) {
            entry.watched.remove(uri);
        }
    }

    /// Remove a subscriber entirely.
    pub fn unregister(&self, subscriber: SubscriberId) {
        self.subscribers.write().remove(&subscriber);
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl NotificationSink for PushNotifier {
    fn notify(&self, family: Family, uri: &ResourceUri) {
        let mut dead: Vec<SubscriberId> = Vec::new();
        {
            let subscribers = self.subscribers.read();
            for (id, subscriber) in subscribers.iter() {
                if !subscriber.watched.contains(uri) {
                    continue;
                }
                let update = ResourceUpdated {
                    family,
                    uri: uri.clone(),
                };
                if subscriber.tx.send(update).is_err() {
                    dead.push(*id);
                }
            }
        }
        if !dead.is_empty() {
            let mut subscribers = self.subscribers.write();
            for id in dead {
                subscribers.remove(&id);
                tracing::debug!(subscriber = id, "pruned disconnected push subscriber");
            }
        }
    }
}

// =============================================================================
// Category Broadcaster
// =============================================================================

/// Per-family broadcast channels.
///
/// Senders are created eagerly for every family; receivers attach on demand.
/// Sends to a family with no receivers are dropped silently, matching tokio
/// broadcast semantics.
pub struct CategoryBroadcaster {
    channels: HashMap<Family, broadcast::Sender<ResourceUpdated>>,
}

impl CategoryBroadcaster {
    /// Create channels for every family with capacities from settings.
    #[must_use]
    pub fn new(settings: &BroadcastSettings) -> Self {
        let mut channels = HashMap::new();
        for family in Family::all() {
            let (tx, _rx) = broadcast::channel(settings.capacity_for(*family));
            channels.insert(*family, tx);
        }
        Self { channels }
    }

    /// Subscribe to all updates in one family.
    ///
    /// # Panics
    ///
    /// Never panics; channels exist for every family by construction.
    #[must_use]
    #[allow(clippy::missing_panics_doc)]
    pub fn subscribe(&self, family: Family) -> broadcast::Receiver<ResourceUpdated> {
        self.channels
            .get(&family)
            .unwrap_or_else(|| unreachable!("channel exists for every family"))
            .subscribe()
    }

    /// Number of receivers currently attached to a family channel.
    #[must_use]
    pub fn receiver_count(&self, family: Family) -> usize {
        self.channels
            .get(&family)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for CategoryBroadcaster {
    fn default() -> Self {
        Self::new(&BroadcastSettings::default())
    }
}

impl NotificationSink for CategoryBroadcaster {
    fn notify(&self, family: Family, uri: &ResourceUri) {
        if let Some(tx) = self.channels.get(&family) {
            // Err means no receivers; that's fine.
            let _ = tx.send(ResourceUpdated {
                family,
                uri: uri.clone(),
            });
        }
    }
}

// =============================================================================
// Fanout
// =============================================================================

/// Forwards every notification to each composed sink in order.
pub struct FanoutNotifier {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl FanoutNotifier {
    /// Compose a set of sinks.
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }
}

impl NotificationSink for FanoutNotifier {
    fn notify(&self, family: Family, uri: &ResourceUri) {
        for sink in &self.sinks {
            sink.notify(family, uri);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
