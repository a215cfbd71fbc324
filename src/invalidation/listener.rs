//! Invalidation listener
//!
//! Applies bus events to whatever holds cache entries.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{EntryKey, EntryStore};
use crate::invalidation::{InvalidationEvent, InvalidationTarget};

/// Something that can drop stale entries.
pub trait InvalidationHandler: Send + Sync + 'static {
    /// Removes one entry. Returns true if it existed.
    fn invalidate_key(&self, key: &EntryKey) -> bool;

    /// Removes every entry of a namespace. Returns the count removed.
    fn invalidate_namespace(&self, namespace: &str) -> usize;

    /// Applies one event.
    fn apply(&self, event: &InvalidationEvent) -> usize {
        match &event.target {
            InvalidationTarget::Key(key) => usize::from(self.invalidate_key(key)),
            InvalidationTarget::Namespace { namespace } => self.invalidate_namespace(namespace),
        }
    }
}

impl InvalidationHandler for EntryStore {
    fn invalidate_key(&self, key: &EntryKey) -> bool {
        self.delete(key)
    }

    fn invalidate_namespace(&self, namespace: &str) -> usize {
        EntryStore::invalidate_namespace(self, namespace)
    }
}

/// Spawns a task applying every event from `events` to `handler`.
///
/// `events` should come from [`InvalidationBus::attach`](crate::invalidation::InvalidationBus::attach)
/// so no event is ever skipped. The task ends when the bus is dropped.
pub fn spawn_invalidation_listener<H: InvalidationHandler>(
    mut events: mpsc::UnboundedReceiver<InvalidationEvent>,
    handler: Arc<H>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting invalidation listener");

        while let Some(event) = events.recv().await {
            let removed = handler.apply(&event);
            debug!(
                scope = ?event.target,
                reason = ?event.reason,
                message = %event.message,
                removed,
                "Applied invalidation"
            );
        }

        info!("Invalidation listener stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::WriteParams;
    use crate::invalidation::{InvalidationBus, InvalidationReason, BUS_CAPACITY};
    use std::time::Duration;

    fn store_with(keys: &[(&str, &str)]) -> Arc<EntryStore> {
        let store = Arc::new(EntryStore::new(10_000, 16 * 1024 * 1024, 1024));
        for (namespace, key) in keys {
            store
                .set((*namespace, *key).into(), "v", WriteParams::with_ttl(60_000))
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_listener_removes_key_in_namespace_only() {
        let store = store_with(&[("a", "k"), ("b", "k")]);
        let bus = InvalidationBus::new();
        let handle = spawn_invalidation_listener(bus.attach(), Arc::clone(&store));

        bus.invalidate("k", InvalidationReason::DataUpdate, "changed", None, Some("a"));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!store.has(&("a", "k").into()));
        assert!(store.has(&("b", "k").into()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_listener_namespace_event() {
        let store = store_with(&[("a", "k1"), ("a", "k2"), ("b", "k1")]);
        let bus = InvalidationBus::new();
        let handle = spawn_invalidation_listener(bus.attach(), Arc::clone(&store));

        bus.invalidate_namespace("a", InvalidationReason::SchemaChange, "v2");
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.len(), 1);
        assert!(store.has(&("b", "k1").into()));

        handle.abort();
    }

    #[tokio::test]
    async fn test_listener_applies_burst_larger_than_bus_capacity() {
        let burst = BUS_CAPACITY * 2;
        let names: Vec<String> = (0..burst).map(|i| format!("k{}", i)).collect();
        let keys: Vec<(&str, &str)> = names.iter().map(|k| ("burst", k.as_str())).collect();
        let store = store_with(&keys);
        let bus = InvalidationBus::new();
        let handle = spawn_invalidation_listener(bus.attach(), Arc::clone(&store));

        // Published without yielding, so the listener only starts draining afterwards
        for name in &names {
            bus.invalidate(name, InvalidationReason::DataUpdate, "bulk import", None, Some("burst"));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(store.is_empty(), "{} entries survived the burst", store.len());

        handle.abort();
    }

    #[tokio::test]
    async fn test_listener_stops_when_bus_dropped() {
        let store = store_with(&[]);
        let bus = InvalidationBus::new();
        let handle = spawn_invalidation_listener(bus.attach(), store);

        drop(bus);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("listener should stop")
            .unwrap();
    }
}
