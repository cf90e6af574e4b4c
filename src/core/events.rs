//! Cache change notifications.
//!
//! Callbacks are stored by id. Subscribing hands back a [`Subscription`] that
//! removes the callback when dropped; it only holds a weak reference to the
//! registry so a forgotten subscription never keeps the manager alive.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use serde::Serialize;

use crate::core::models::{ResourceKind, TrackId};

/// Something observable changed in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CacheEvent {
    /// A track gained or lost cached resources.
    TrackCacheChanged { track_id: TrackId, cached: bool },
    /// A recalculation finished.
    UsageRecalculated { total_bytes: u64 },
    /// Always-offline selections do not fit; ask the user for more room.
    StorageIncreaseSuggested {
        required_bytes: u64,
        current_budget: u64,
    },
    /// A cached flag pointed at a missing blob and was cleared.
    InconsistencyRepaired {
        track_id: TrackId,
        kind: ResourceKind,
    },
}

type Callback = Arc<dyn Fn(&CacheEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    callbacks: RwLock<HashMap<u64, Callback>>,
}

/// Publish/subscribe hub for [`CacheEvent`]s.
#[derive(Clone, Default)]
pub struct CacheEvents {
    inner: Arc<Registry>,
}

impl std::fmt::Debug for CacheEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheEvents")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

impl CacheEvents {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays registered while the returned
    /// [`Subscription`] is alive.
    #[must_use = "dropping the subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CacheEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(callback));
        Subscription {
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver an event to every subscriber, on the calling thread.
    pub fn publish(&self, event: &CacheEvent) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        tracing::trace!(?event, subscribers = callbacks.len(), "Publishing cache event");
        for callback in callbacks {
            callback(event);
        }
    }

    /// Subscribe a recorder that keeps every event, in order.
    #[must_use = "dropping the log unsubscribes immediately"]
    pub fn record(&self) -> EventLog {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let subscription = self.subscribe(move |event| {
            sink.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event.clone());
        });
        EventLog {
            events,
            _subscription: subscription,
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Live registration; unsubscribes on drop.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .callbacks
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&self.id);
        }
    }
}

/// Events seen since [`CacheEvents::record`] was called.
pub struct EventLog {
    events: Arc<Mutex<Vec<CacheEvent>>>,
    _subscription: Subscription,
}

impl EventLog {
    #[must_use]
    pub fn snapshot(&self) -> Vec<CacheEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&CacheEvent) -> bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| predicate(event))
            .count()
    }
}
