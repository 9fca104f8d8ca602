use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tracing::debug;
use uuid::Uuid;

use super::ProgressSnapshot;

/// Callback invoked with every published snapshot
pub type ProgressCallback = Arc<dyn Fn(&ProgressSnapshot) + Send + Sync>;

type Registry = DashMap<Uuid, ProgressCallback>;

/// Registry of progress observers
#[derive(Clone, Default)]
pub struct ProgressSubscribers {
    callbacks: Arc<Registry>,
}

impl ProgressSubscribers {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback. It stays registered until
    /// [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ProgressSnapshot) + Send + Sync + 'static,
    {
        let id = Uuid::new_v4();
        self.callbacks.insert(id, Arc::new(callback));
        debug!(subscription_id = %id, "Progress subscriber registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.callbacks),
        }
    }

    /// Push a snapshot to every subscriber.
    ///
    /// Callbacks are collected first so one may unsubscribe from inside its
    /// own invocation.
    pub fn publish(&self, snapshot: &ProgressSnapshot) {
        let callbacks: Vec<ProgressCallback> =
            self.callbacks.iter().map(|entry| entry.value().clone()).collect();

        for callback in callbacks {
            callback(snapshot);
        }
    }

    /// Number of registered callbacks
    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    /// Whether no callback is registered
    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }
}

/// Handle returned by `subscribe`
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Subscription identifier
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop receiving snapshots
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
            debug!(subscription_id = %self.id, "Progress subscriber removed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressTracker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_publish_and_unsubscribe() {
        let subscribers = ProgressSubscribers::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        let subscription = subscribers.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let snapshot = ProgressTracker::new().snapshot();
        subscribers.publish(&snapshot);
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        subscription.unsubscribe();
        subscribers.publish(&snapshot);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert!(subscribers.is_empty());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let subscribers = ProgressSubscribers::new();
        let subscription = subscribers.subscribe(|_| {});
        drop(subscribers);
        subscription.unsubscribe();
    }
}
