//! Smart Cache Manager
//!
//! Façade composing the entry store, the adaptive TTL engine, the
//! invalidation bus and the background refresher behind one handle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::{EntryKey, EntryStore, WriteParams, WriteReceipt};
use crate::config::CacheConfig;
use crate::error::{CacheError, Result};
use crate::invalidation::{
    spawn_invalidation_listener, InvalidationBus, InvalidationHandler, InvalidationReason,
    Metadata,
};
use crate::models::{EntryDetails, SetOptions, StatsSnapshot};
use crate::tasks::{spawn_cleanup_task, RefreshScheduler, RefreshSettings, RefreshSpec, RefreshState};
use crate::ttl::{DataClass, TtlEngine, TtlSource};

/// Store plus the refresher handle; every removal goes through here so the
/// matching refresh registration is cancelled with it.
struct CacheCore {
    store: Arc<EntryStore>,
    refresher: RefreshScheduler,
}

impl InvalidationHandler for CacheCore {
    fn invalidate_key(&self, key: &EntryKey) -> bool {
        self.refresher.cancel(key);
        self.store.delete(key)
    }

    fn invalidate_namespace(&self, namespace: &str) -> usize {
        self.refresher.cancel_namespace(namespace);
        self.store.invalidate_namespace(namespace)
    }
}

// == Smart Cache ==
/// The process-wide cache service.
///
/// Construct once at startup and share it (it is `Send + Sync`; wrap it in an
/// `Arc` to hand it to several tasks). Background loops are stopped by
/// [`shutdown`](Self::shutdown) or when the cache is dropped.
pub struct SmartCache {
    core: Arc<CacheCore>,
    ttl: Arc<TtlEngine>,
    bus: InvalidationBus,
    config: CacheConfig,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SmartCache {
    // == Constructor ==
    /// Builds the cache and spawns its background tasks.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: CacheConfig) -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map_err(|e| CacheError::Internal(format!("SmartCache needs a tokio runtime: {}", e)))?;

        let store = Arc::new(EntryStore::from_config(&config));
        let ttl = Arc::new(TtlEngine::new(config.ttl_policy.clone()));
        let (refresher, refresh_handle) = RefreshScheduler::spawn(
            Arc::clone(&store),
            Arc::clone(&ttl),
            RefreshSettings::from_config(&config),
        );

        let core = Arc::new(CacheCore {
            store: Arc::clone(&store),
            refresher: refresher.clone(),
        });
        let bus = InvalidationBus::new();
        let listener_handle = spawn_invalidation_listener(bus.attach(), Arc::clone(&core));

        let mut tasks = vec![refresh_handle, listener_handle];
        if config.cleanup_interval_ms > 0 {
            tasks.push(spawn_cleanup_task(
                store,
                refresher,
                Duration::from_millis(config.cleanup_interval_ms),
            ));
        }

        info!(
            max_entries = config.max_entries,
            max_size_bytes = config.max_size_bytes,
            default_ttl_ms = config.default_ttl_ms,
            cleanup_interval_ms = config.cleanup_interval_ms,
            "Smart cache initialized"
        );

        Ok(Self {
            core,
            ttl,
            bus,
            config,
            tasks: Mutex::new(tasks),
        })
    }

    // == Set ==
    /// Stores `value` under `key`.
    ///
    /// With a refresh callback in `options` the entry is registered for
    /// background refresh; without one, any previous registration of the key
    /// is cancelled. Fails without touching the store if the value cannot be
    /// serialized.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: impl Into<EntryKey>,
        value: &T,
        options: SetOptions,
    ) -> Result<WriteReceipt> {
        let mut key = key.into();
        if let Some(namespace) = options.namespace.as_deref() {
            key.namespace = namespace.to_string();
        }

        let ttl_source = self.ttl_source(&options);
        let ttl_ms = self.ttl.resolve(&ttl_source);
        let params = WriteParams {
            ttl_ms,
            compress: options.compress,
            refreshable: options.refresh.is_some(),
            data_class: ttl_source.data_class(),
        };

        let receipt = self.core.store.set(key.clone(), value, params)?;
        for evicted in &receipt.evicted {
            self.core.refresher.cancel(evicted);
        }

        match options.refresh {
            Some(refresh) => self.core.refresher.register(RefreshSpec {
                key,
                seq: receipt.seq,
                ttl_ms: receipt.ttl_ms,
                ttl_source,
                compress: options.compress,
                refresh,
            }),
            None => self.core.refresher.cancel(&key),
        }

        Ok(receipt)
    }

    /// Explicit TTL first, then the adaptive engine, then the default.
    fn ttl_source(&self, options: &SetOptions) -> TtlSource {
        if let Some(ttl_ms) = options.valid_ttl_ms() {
            return TtlSource::Fixed(ttl_ms);
        }
        if let Some(ttl_ms) = options.ttl_ms {
            debug!(ttl_ms, "Ignoring non-positive TTL");
        }

        match (&options.data_type, options.context) {
            (None, None) => TtlSource::Default(self.config.default_ttl_ms),
            (data_type, context) => TtlSource::Adaptive {
                class: data_type
                    .as_deref()
                    .map(DataClass::parse)
                    .unwrap_or(DataClass::Default),
                context,
            },
        }
    }

    // == Get ==
    /// Returns the live value of `key`, `Ok(None)` if absent or expired.
    pub fn get<T: DeserializeOwned>(&self, key: impl Into<EntryKey>) -> Result<Option<T>> {
        self.core.store.get(&key.into())
    }

    pub fn has(&self, key: impl Into<EntryKey>) -> bool {
        self.core.store.has(&key.into())
    }

    // == Delete ==
    /// Removes an entry and cancels its refresh. Returns true if it existed.
    pub fn delete(&self, key: impl Into<EntryKey>) -> bool {
        self.core.invalidate_key(&key.into())
    }

    // == Clear ==
    /// Removes every entry, cancels every refresh and resets statistics.
    pub fn clear(&self) -> usize {
        self.core.refresher.cancel_all();
        let removed = self.core.store.clear();
        info!(removed, "Cache cleared");
        removed
    }

    // == Invalidate Namespace ==
    /// Synchronously removes every entry of `namespace`.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let removed = self.core.invalidate_namespace(namespace);
        debug!(namespace, removed, "Invalidated namespace");
        removed
    }

    // == Invalidate ==
    /// Publishes an invalidation of `key` on the bus. Removal happens
    /// asynchronously, shortly after the call returns.
    pub fn invalidate(
        &self,
        key: &str,
        reason: InvalidationReason,
        message: impl Into<String>,
        metadata: Option<Metadata>,
        namespace: Option<&str>,
    ) -> usize {
        self.bus.invalidate(key, reason, message, metadata, namespace)
    }

    /// The bus, for producers that only need to publish or subscribe.
    pub fn bus(&self) -> &InvalidationBus {
        &self.bus
    }

    // == Stats ==
    pub fn stats(&self) -> StatsSnapshot {
        let refresh = self.core.refresher.stats();
        StatsSnapshot {
            refresh_successes: refresh.successes(),
            refresh_failures: refresh.failures(),
            scheduled_refreshes: refresh.registered(),
            ..self.core.store.stats()
        }
    }

    /// Metadata of a live entry. Does not count as an access.
    pub fn entry_details(&self, key: impl Into<EntryKey>) -> Option<EntryDetails> {
        self.core.store.entry_details(&key.into())
    }

    pub fn all_entries(&self) -> Vec<EntryDetails> {
        self.core.store.all_entries()
    }

    // == Refresh Control ==
    /// Stops background refresh of `key`; the cached value stays until it
    /// expires. Idempotent.
    pub fn cancel_refresh(&self, key: impl Into<EntryKey>) {
        self.core.refresher.cancel(&key.into());
    }

    /// Refresh state of `key`. `None` when the key has no live registration,
    /// including after delete, invalidation, cancellation or exhausted retries.
    pub async fn refresh_state(&self, key: impl Into<EntryKey>) -> Option<RefreshState> {
        self.core.refresher.state(&key.into()).await
    }

    pub fn ttl_engine(&self) -> &TtlEngine {
        &self.ttl
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // == Shutdown ==
    /// Stops the background loops. Cached values stay readable.
    pub async fn shutdown(&self) {
        self.core.refresher.shutdown();
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain(..)
            .collect();

        let mut tasks = tasks.into_iter();
        // The refresh loop is first and exits on its own
        if let Some(refresh_loop) = tasks.next() {
            let _ = refresh_loop.await;
        }
        for task in tasks {
            task.abort();
        }
        info!("Smart cache shut down");
    }
}

impl Drop for SmartCache {
    fn drop(&mut self) {
        let tasks = self
            .tasks
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}
