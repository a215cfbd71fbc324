//! Invalidation Bus
//!
//! Publish/subscribe channel decoupling producers of staleness events from
//! the store that reacts to them.
//!
//! Two delivery paths: attached sinks (unbounded mpsc, lossless) feed the
//! components that must apply every event, broadcast subscribers observe and
//! may lag.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::cache::EntryKey;
use crate::invalidation::{InvalidationEvent, InvalidationReason, Metadata};

/// Buffered events per broadcast subscriber before it starts lagging.
pub const BUS_CAPACITY: usize = 1024;

/// Events kept for [`InvalidationBus::recent_events`].
pub const HISTORY_LIMIT: usize = 100;

// == Invalidation Bus ==
/// Cloneable publisher of invalidation events.
///
/// Publishing never blocks and never waits for subscribers; delivery is
/// asynchronous.
#[derive(Debug, Clone)]
pub struct InvalidationBus {
    sender: broadcast::Sender<InvalidationEvent>,
    sinks: Arc<Mutex<Vec<mpsc::UnboundedSender<InvalidationEvent>>>>,
    history: Arc<Mutex<VecDeque<InvalidationEvent>>>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::with_capacity(BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sinks: Arc::new(Mutex::new(Vec::new())),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT))),
        }
    }

    // == Invalidate ==
    /// Declares `key` in `namespace` (default namespace if `None`) stale.
    ///
    /// Returns the number of sinks and subscribers the event was delivered to.
    pub fn invalidate(
        &self,
        key: &str,
        reason: InvalidationReason,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        namespace: Option<&str>,
    ) -> usize {
        let key = match namespace {
            Some(namespace) => EntryKey::new(namespace, key),
            None => EntryKey::in_default(key),
        };
        let event = InvalidationEvent::for_key(key, reason, message)
            .with_metadata(metadata.unwrap_or_default());
        self.publish(event)
    }

    /// Declares every key of `namespace` stale.
    pub fn invalidate_namespace(
        &self,
        namespace: &str,
        reason: InvalidationReason,
        message: impl Into<String>,
    ) -> usize {
        self.publish(InvalidationEvent::for_namespace(namespace, reason, message))
    }

    // == Publish ==
    /// Publishes an event and records it in the history.
    pub fn publish(&self, event: InvalidationEvent) -> usize {
        {
            let mut history = self
                .history
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if history.len() == HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(event.clone());
        }

        let attached = {
            let mut sinks = self
                .sinks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            sinks.retain(|sink| sink.send(event.clone()).is_ok());
            sinks.len()
        };

        let observers = self.sender.send(event).unwrap_or(0);
        if attached + observers == 0 {
            debug!("Invalidation published with no subscribers");
        }
        attached + observers
    }

    // == Subscribe ==
    /// Attaches a lossless sink. Every event published afterwards is queued
    /// for it until the receiver is dropped.
    pub fn attach(&self) -> mpsc::UnboundedReceiver<InvalidationEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(tx);
        rx
    }

    /// Subscribes an observer. Observers that fall more than
    /// [`BUS_CAPACITY`] events behind skip the oldest ones.
    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        let attached = self
            .sinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|sink| !sink.is_closed())
            .count();
        attached + self.sender.receiver_count()
    }

    /// Most recent events, newest last.
    pub fn recent_events(&self, limit: usize) -> Vec<InvalidationEvent> {
        let history = self
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}
