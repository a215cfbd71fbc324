//! Background Refresh Task
//!
//! Proactively recomputes refreshable entries shortly before they expire.
//!
//! A single scheduling loop owns every registration and a min-heap of
//! deadlines. Callers talk to it through an unbounded channel, so `set`,
//! `delete` and `clear` never wait on a refresh. Each refresh attempt runs in
//! its own task and reports back to the loop, so a slow callback for one key
//! never delays another.
//!
//! Heap slots are tagged with a generation. Re-registering or cancelling a
//! key bumps or drops its generation, which turns every outstanding slot and
//! in-flight result for the old generation into a no-op.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use crate::cache::{encode, EntryKey, EntryStore};
use crate::config::CacheConfig;
use crate::error::CacheError;
use crate::ttl::{TtlEngine, TtlSource};

/// Cap on the delay between two attempts of the same cycle.
const MAX_BACKOFF: Duration = Duration::from_secs(30);

// == Refresh Function ==
/// Boxed future returned by a refresh callback.
pub type RefreshFuture = Pin<Box<dyn Future<Output = anyhow::Result<serde_json::Value>> + Send>>;

/// Type-erased zero-argument callback producing a fresh value.
#[derive(Clone)]
pub struct RefreshFn(Arc<dyn Fn() -> RefreshFuture + Send + Sync>);

impl RefreshFn {
    /// Wraps an async callback returning any serializable value.
    pub fn new<F, Fut, T>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
        T: Serialize + Send + 'static,
    {
        Self(Arc::new(move || -> RefreshFuture {
            let pending = f();
            Box::pin(async move {
                let value = pending.await?;
                Ok::<_, anyhow::Error>(serde_json::to_value(value)?)
            })
        }))
    }

    pub fn call(&self) -> RefreshFuture {
        (self.0)()
    }
}

impl fmt::Debug for RefreshFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RefreshFn")
    }
}

// == Refresh Settings ==
/// Tuning of the refresh loop.
#[derive(Debug, Clone)]
pub struct RefreshSettings {
    /// Fraction of the TTL after which a refresh fires, in (0, 1)
    pub ratio: f64,
    pub timeout: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub compression_threshold: usize,
}

impl RefreshSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            ratio: config.refresh_ratio,
            timeout: Duration::from_millis(config.refresh_timeout_ms.max(1)),
            max_attempts: config.refresh_max_attempts.max(1),
            backoff_base: Duration::from_millis(config.refresh_backoff_ms),
            compression_threshold: config.compression_threshold,
        }
    }

    /// Delay from a write until its refresh: strictly inside the TTL.
    ///
    /// `latency` is how long the last successful callback took. The refresh
    /// fires early enough to leave twice that before expiry.
    pub fn refresh_delay(&self, ttl_ms: u64, latency: Duration) -> Duration {
        let ratio = if self.ratio > 0.0 && self.ratio < 1.0 {
            self.ratio
        } else {
            0.8
        };
        let headroom = u64::try_from(latency.as_millis())
            .unwrap_or(u64::MAX)
            .saturating_mul(2);
        let delay = (((ttl_ms as f64) * ratio) as u64).min(ttl_ms.saturating_sub(headroom));
        Duration::from_millis(delay.clamp(1, ttl_ms.saturating_sub(1).max(1)))
    }

    /// Bounded exponential backoff before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RefreshSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

// == Refresh Registration ==
/// What the refresher needs to know about one refreshable entry.
#[derive(Debug, Clone)]
pub struct RefreshSpec {
    pub key: EntryKey,
    /// Write sequence of the version being kept fresh
    pub seq: u64,
    pub ttl_ms: u64,
    pub ttl_source: TtlSource,
    pub compress: Option<bool>,
    pub refresh: RefreshFn,
}

/// Lifecycle of a registration.
///
/// A key without a registration has no state: it was never registered, or
/// its registration ended because the entry was deleted, invalidated,
/// replaced without a callback or expired, the refresh was cancelled, or
/// every attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    /// Waiting for its deadline
    Scheduled,
    /// Callback in flight
    Refreshing,
    /// Last attempt failed; a retry is scheduled
    Failed,
}

// == Refresh Stats ==
/// Counters shared between the loop and its handles.
#[derive(Debug, Default)]
pub struct RefreshStats {
    successes: AtomicU64,
    failures: AtomicU64,
    registered: AtomicUsize,
}

impl RefreshStats {
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Registrations currently alive.
    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Relaxed)
    }
}

enum Command {
    Register(RefreshSpec),
    Cancel(EntryKey),
    CancelNamespace(String),
    CancelAll,
    Completed {
        key: EntryKey,
        generation: u64,
        elapsed: Duration,
        outcome: Result<serde_json::Value, CacheError>,
    },
    Inspect(EntryKey, oneshot::Sender<Option<RefreshState>>),
    Shutdown,
}

// == Refresh Scheduler ==
/// Cloneable handle to the refresh loop.
///
/// All operations are fire-and-forget and idempotent: cancelling an unknown
/// or already-cancelled key does nothing.
#[derive(Clone)]
pub struct RefreshScheduler {
    tx: mpsc::UnboundedSender<Command>,
    stats: Arc<RefreshStats>,
}

impl RefreshScheduler {
    /// Spawns the refresh loop on the current tokio runtime.
    ///
    /// The loop stops on [`shutdown`](Self::shutdown) or once every handle
    /// has been dropped.
    pub fn spawn(
        store: Arc<EntryStore>,
        ttl: Arc<TtlEngine>,
        settings: RefreshSettings,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stats = Arc::new(RefreshStats::default());

        let refresh_loop = RefreshLoop {
            store,
            ttl,
            settings,
            rx,
            tx: tx.downgrade(),
            stats: Arc::clone(&stats),
            registrations: HashMap::new(),
            deadlines: BinaryHeap::new(),
            next_generation: 0,
        };
        let handle = tokio::spawn(refresh_loop.run());

        (Self { tx, stats }, handle)
    }

    /// Registers (or re-registers) an entry for background refresh.
    pub fn register(&self, spec: RefreshSpec) {
        self.send(Command::Register(spec));
    }

    pub fn cancel(&self, key: &EntryKey) {
        self.send(Command::Cancel(key.clone()));
    }

    pub fn cancel_namespace(&self, namespace: &str) {
        self.send(Command::CancelNamespace(namespace.to_string()));
    }

    pub fn cancel_all(&self) {
        self.send(Command::CancelAll);
    }

    /// Stops the loop. In-flight callbacks finish but are not written back.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    /// Current state of a registration.
    ///
    /// `None` covers both "never registered" and "registration ended"; see
    /// [`RefreshState`].
    pub async fn state(&self, key: &EntryKey) -> Option<RefreshState> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Inspect(key.clone(), reply));
        response.await.ok().flatten()
    }

    pub fn stats(&self) -> &RefreshStats {
        &self.stats
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            debug!("Refresh loop already stopped");
        }
    }
}

struct Registration {
    spec: RefreshSpec,
    generation: u64,
    attempts: u32,
    state: RefreshState,
    /// Duration of the last successful callback
    latency: Duration,
    /// When the registered version expires
    expires_at: Instant,
}

struct RefreshLoop {
    store: Arc<EntryStore>,
    ttl: Arc<TtlEngine>,
    settings: RefreshSettings,
    rx: mpsc::UnboundedReceiver<Command>,
    tx: mpsc::WeakUnboundedSender<Command>,
    stats: Arc<RefreshStats>,
    registrations: HashMap<EntryKey, Registration>,
    deadlines: BinaryHeap<Reverse<(Instant, u64, EntryKey)>>,
    next_generation: u64,
}

impl RefreshLoop {
    async fn run(mut self) {
        info!("Starting background refresh loop");

        loop {
            let next_deadline = self.deadlines.peek().map(|Reverse((at, _, _))| *at);
            let wait = async move {
                match next_deadline {
                    Some(at) => sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = wait => self.fire_due(),
            }
        }

        for (key, registration) in self.registrations.drain() {
            self.store.release_refresh(&key, registration.spec.seq);
        }
        self.sync_gauge();
        info!("Background refresh loop stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Register(spec) => {
                let now = Instant::now();
                let delay = self.settings.refresh_delay(spec.ttl_ms, Duration::ZERO);
                let key = spec.key.clone();
                let generation = self.bump_generation();
                debug!(key = %key, delay_ms = delay.as_millis() as u64, "Scheduled refresh");
                self.registrations.insert(
                    key.clone(),
                    Registration {
                        expires_at: now + Duration::from_millis(spec.ttl_ms),
                        spec,
                        generation,
                        attempts: 0,
                        state: RefreshState::Scheduled,
                        latency: Duration::ZERO,
                    },
                );
                self.deadlines.push(Reverse((now + delay, generation, key)));
            }
            Command::Cancel(key) => {
                if self.drop_registration(&key) {
                    debug!(key = %key, "Cancelled refresh");
                }
            }
            Command::CancelNamespace(namespace) => {
                let doomed: Vec<EntryKey> = self
                    .registrations
                    .keys()
                    .filter(|key| key.namespace == namespace)
                    .cloned()
                    .collect();
                for key in &doomed {
                    self.drop_registration(key);
                }
            }
            Command::CancelAll => {
                for (key, registration) in self.registrations.drain() {
                    self.store.release_refresh(&key, registration.spec.seq);
                }
                self.deadlines.clear();
            }
            Command::Completed {
                key,
                generation,
                elapsed,
                outcome,
            } => self.complete(key, generation, elapsed, outcome),
            Command::Inspect(key, reply) => {
                let _ = reply.send(self.registrations.get(&key).map(|r| r.state));
            }
            Command::Shutdown => {}
        }
        self.sync_gauge();
    }

    /// Launches every refresh whose deadline has passed.
    fn fire_due(&mut self) {
        let now = Instant::now();
        while let Some(Reverse((at, _, _))) = self.deadlines.peek() {
            if *at > now {
                break;
            }
            let Some(Reverse((_, generation, key))) = self.deadlines.pop() else {
                break;
            };
            self.launch(key, generation);
        }
        self.sync_gauge();
    }

    fn launch(&mut self, key: EntryKey, generation: u64) {
        let Some(registration) = self.registrations.get_mut(&key) else {
            return;
        };
        if registration.generation != generation {
            return;
        }

        // Deleted, replaced or expired since registration
        let live = self
            .store
            .version(&key)
            .is_some_and(|version| version.seq == registration.spec.seq);
        if !live {
            if Instant::now() >= registration.expires_at {
                warn!(
                    key = %key,
                    attempts = registration.attempts,
                    "Entry expired before its refresh could start, dropping registration"
                );
            } else {
                debug!(key = %key, "Entry gone, dropping refresh");
            }
            self.drop_registration(&key);
            return;
        }

        registration.state = RefreshState::Refreshing;
        let refresh = registration.spec.refresh.clone();
        let limit = self.settings.timeout;
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let mut attempt = tokio::spawn(refresh.call());
            let outcome = match timeout(limit, &mut attempt).await {
                Ok(Ok(Ok(value))) => Ok(value),
                Ok(Ok(Err(err))) => Err(CacheError::RefreshFailed(format!("{:#}", err))),
                Ok(Err(join_err)) => Err(CacheError::RefreshFailed(join_err.to_string())),
                Err(_) => {
                    attempt.abort();
                    Err(CacheError::RefreshTimeout(limit.as_millis() as u64))
                }
            };

            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(Command::Completed {
                    key,
                    generation,
                    elapsed: started.elapsed(),
                    outcome,
                });
            }
        });
    }

    fn complete(
        &mut self,
        key: EntryKey,
        generation: u64,
        elapsed: Duration,
        outcome: Result<serde_json::Value, CacheError>,
    ) {
        let Some(registration) = self
            .registrations
            .get(&key)
            .filter(|r| r.generation == generation)
        else {
            debug!(key = %key, "Discarding result of cancelled refresh");
            return;
        };
        let late = Instant::now() >= registration.expires_at;

        let result = outcome.and_then(|value| self.write_back(&key, value, elapsed));
        match result {
            Ok(true) => {
                self.stats.successes.fetch_add(1, Ordering::Relaxed);
                if late {
                    warn!(
                        key = %key,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Refresh finished after the entry expired, restored it and moved the next refresh earlier"
                    );
                }
            }
            Ok(false) => {
                info!(key = %key, "Entry changed during refresh, dropping registration");
                self.drop_registration(&key);
            }
            Err(err) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                self.retry(key, err);
            }
        }
    }

    /// Stores the refreshed value and schedules the next cycle.
    ///
    /// Returns `Ok(false)` when the entry no longer holds the registered
    /// version.
    fn write_back(
        &mut self,
        key: &EntryKey,
        value: serde_json::Value,
        elapsed: Duration,
    ) -> Result<bool, CacheError> {
        let Some(registration) = self.registrations.get(key) else {
            return Ok(false);
        };
        let spec = &registration.spec;
        let encoded = encode(
            &value,
            self.settings.compression_threshold,
            spec.compress,
        )?;
        let ttl_ms = self.ttl.resolve(&spec.ttl_source);

        let Some(receipt) = self
            .store
            .replace_if_current(key, spec.seq, encoded, ttl_ms)?
        else {
            return Ok(false);
        };

        let now = Instant::now();
        let generation = self.bump_generation();
        let delay = self.settings.refresh_delay(receipt.ttl_ms, elapsed);
        if let Some(registration) = self.registrations.get_mut(key) {
            registration.spec.seq = receipt.seq;
            registration.spec.ttl_ms = receipt.ttl_ms;
            registration.generation = generation;
            registration.attempts = 0;
            registration.state = RefreshState::Scheduled;
            registration.latency = elapsed;
            registration.expires_at = now + Duration::from_millis(receipt.ttl_ms);
        }
        self.deadlines.push(Reverse((now + delay, generation, key.clone())));

        for evicted in receipt.evicted {
            self.registrations.remove(&evicted);
        }

        debug!(key = %key, ttl_ms, "Refreshed entry");
        Ok(true)
    }

    /// Schedules a retry with backoff, or gives up and leaves the stale
    /// value in place until it expires.
    fn retry(&mut self, key: EntryKey, err: CacheError) {
        let generation = self.bump_generation();
        let max_attempts = self.settings.max_attempts;
        let Some(registration) = self.registrations.get_mut(&key) else {
            return;
        };

        registration.attempts += 1;
        if registration.attempts >= max_attempts {
            warn!(
                key = %key,
                attempts = registration.attempts,
                error = %err,
                "Refresh attempts exhausted, serving stale value until expiry"
            );
            self.drop_registration(&key);
            return;
        }

        let delay = self.settings.backoff(registration.attempts);
        warn!(
            key = %key,
            attempt = registration.attempts,
            retry_in_ms = delay.as_millis() as u64,
            error = %err,
            "Refresh failed, retrying"
        );
        registration.generation = generation;
        registration.state = RefreshState::Failed;
        self.deadlines
            .push(Reverse((Instant::now() + delay, generation, key)));
    }

    /// Ends a registration. Returns true if one existed.
    fn drop_registration(&mut self, key: &EntryKey) -> bool {
        match self.registrations.remove(key) {
            Some(registration) => {
                self.store.release_refresh(key, registration.spec.seq);
                true
            }
            None => false,
        }
    }

    fn bump_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn sync_gauge(&mut self) {
        // Drop heap slots whose registration is gone once they dominate the heap
        if self.deadlines.len() > 64 && self.deadlines.len() > self.registrations.len() * 4 {
            let registrations = &self.registrations;
            self.deadlines.retain(|Reverse((_, generation, key))| {
                registrations
                    .get(key)
                    .is_some_and(|r| r.generation == *generation)
            });
        }
        self.stats
            .registered
            .store(self.registrations.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::WriteParams;
    use std::sync::atomic::AtomicU32;

    fn settings() -> RefreshSettings {
        RefreshSettings {
            ratio: 0.5,
            timeout: Duration::from_millis(200),
            max_attempts: 3,
            backoff_base: Duration::from_millis(20),
            compression_threshold: 1024,
        }
    }

    fn setup() -> (Arc<EntryStore>, RefreshScheduler, JoinHandle<()>) {
        let store = Arc::new(EntryStore::new(100, 1024 * 1024, 1024));
        let (scheduler, handle) =
            RefreshScheduler::spawn(Arc::clone(&store), Arc::new(TtlEngine::default()), settings());
        (store, scheduler, handle)
    }

    fn register(
        store: &EntryStore,
        scheduler: &RefreshScheduler,
        key: &str,
        ttl_ms: u64,
        refresh: RefreshFn,
    ) {
        let receipt = store
            .set(key.into(), &0u32, WriteParams { ttl_ms, refreshable: true, ..Default::default() })
            .unwrap();
        scheduler.register(RefreshSpec {
            key: key.into(),
            seq: receipt.seq,
            ttl_ms,
            ttl_source: TtlSource::Fixed(ttl_ms),
            compress: None,
            refresh,
        });
    }

    fn counting(counter: Arc<AtomicU32>) -> RefreshFn {
        RefreshFn::new(move || {
            let counter = Arc::clone(&counter);
            async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
        })
    }

    #[test]
    fn test_refresh_fn_serializes_result() {
        let refresh = RefreshFn::new(|| async { Ok(vec![1u8, 2, 3]) });
        let value = tokio_test::assert_ok!(tokio_test::block_on(refresh.call()));
        assert_eq!(value, serde_json::json!([1, 2, 3]));

        let failing = RefreshFn::new(|| async { Err::<(), _>(anyhow::anyhow!("boom")) });
        tokio_test::assert_err!(tokio_test::block_on(failing.call()));
    }

    #[test]
    fn test_refresh_delay_inside_ttl() {
        let settings = RefreshSettings {
            ratio: 0.8,
            ..settings()
        };
        assert_eq!(settings.refresh_delay(1000, Duration::ZERO), Duration::from_millis(800));
        assert_eq!(settings.refresh_delay(1, Duration::ZERO), Duration::from_millis(1));
        assert!(settings.refresh_delay(2, Duration::ZERO) < Duration::from_millis(2));
    }

    #[test]
    fn test_refresh_delay_leaves_room_for_slow_callbacks() {
        let settings = RefreshSettings {
            ratio: 0.8,
            ..settings()
        };
        let ms = Duration::from_millis;
        assert_eq!(settings.refresh_delay(1000, ms(50)), ms(800));
        assert_eq!(settings.refresh_delay(1000, ms(300)), ms(400));
        assert_eq!(settings.refresh_delay(1000, ms(700)), ms(1));
        assert_eq!(settings.refresh_delay(1000, Duration::MAX), ms(1));
    }

    #[test]
    fn test_backoff_is_bounded_exponential() {
        let settings = settings();
        assert_eq!(settings.backoff(1), Duration::from_millis(20));
        assert_eq!(settings.backoff(2), Duration::from_millis(40));
        assert_eq!(settings.backoff(3), Duration::from_millis(80));
        assert_eq!(settings.backoff(64), MAX_BACKOFF);
    }

    #[tokio::test]
    async fn test_refresh_updates_value_before_expiry() {
        let (store, scheduler, handle) = setup();
        let counter = Arc::new(AtomicU32::new(0));
        register(&store, &scheduler, "hot", 400, counting(Arc::clone(&counter)));

        tokio::time::sleep(Duration::from_millis(300)).await;

        let value: Option<u32> = store.get(&"hot".into()).unwrap();
        assert!(value.unwrap() >= 1, "value should reflect a refresh");
        assert!(counter.load(Ordering::SeqCst) >= 1);
        assert!(scheduler.stats().successes() >= 1);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_refresh_keeps_entry_alive_past_original_ttl() {
        let (store, scheduler, handle) = setup();
        let counter = Arc::new(AtomicU32::new(0));
        register(&store, &scheduler, "hot", 300, counting(Arc::clone(&counter)));

        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(store.has(&"hot".into()), "refreshed entry must not expire");
        }

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let (store, scheduler, handle) = setup();
        let counter = Arc::new(AtomicU32::new(0));
        register(&store, &scheduler, "k", 200, counting(Arc::clone(&counter)));

        assert_eq!(scheduler.state(&"k".into()).await, Some(RefreshState::Scheduled));
        scheduler.cancel(&"k".into());
        scheduler.cancel(&"k".into());
        scheduler.cancel(&"unknown".into());
        assert_eq!(scheduler.state(&"k".into()).await, None);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_deleted_entry_is_not_refreshed() {
        let (store, scheduler, handle) = setup();
        let counter = Arc::new(AtomicU32::new(0));
        register(&store, &scheduler, "k", 200, counting(Arc::clone(&counter)));

        store.delete(&"k".into());
        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(store.is_empty());
        assert_eq!(scheduler.state(&"k".into()).await, None);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failures_retry_then_fail_open() {
        let (store, scheduler, handle) = setup();
        let attempts = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&attempts);
        let failing = RefreshFn::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(anyhow::anyhow!("upstream unavailable"))
            }
        });
        register(&store, &scheduler, "flaky", 1000, failing);

        // First attempt at 500ms, retries after 20ms and 40ms
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(scheduler.stats().failures(), 3);
        assert_eq!(scheduler.state(&"flaky".into()).await, None);
        let stale: Option<u32> = store.get(&"flaky".into()).unwrap();
        assert_eq!(stale, Some(0), "stale value stays available");

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_refresh_times_out() {
        let (store, scheduler, handle) = setup();
        let slow = RefreshFn::new(|| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1u32)
        });
        register(&store, &scheduler, "slow", 1000, slow);

        // Fires at 500ms, times out at 700ms
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert!(scheduler.stats().failures() >= 1);
        let value: Option<u32> = store.get(&"slow".into()).unwrap();
        assert_eq!(value, Some(0));

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_slow_refresh_finishing_after_expiry_is_kept() {
        let store = Arc::new(EntryStore::new(100, 1024 * 1024, 1024));
        let (scheduler, handle) = RefreshScheduler::spawn(
            Arc::clone(&store),
            Arc::new(TtlEngine::default()),
            RefreshSettings {
                ratio: 0.8,
                timeout: Duration::from_secs(2),
                ..settings()
            },
        );
        let counter = Arc::new(AtomicU32::new(0));
        let calls = Arc::clone(&counter);
        let slow = RefreshFn::new(move || {
            let calls = Arc::clone(&calls);
            async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok(calls.fetch_add(1, Ordering::SeqCst) + 1)
            }
        });
        register(&store, &scheduler, "slow", 1000, slow);

        // First attempt runs from 800ms to 1100ms, past the 1000ms expiry
        tokio::time::sleep(Duration::from_millis(1250)).await;

        let value: Option<u32> = store.get(&"slow".into()).unwrap();
        assert_eq!(value, Some(1), "late result is written back");
        assert_eq!(scheduler.stats().successes(), 1);
        assert!(scheduler.state(&"slow".into()).await.is_some());

        // Later cycles start early enough to land before expiry
        for _ in 0..14 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(store.has(&"slow".into()), "entry must not lapse again");
        }
        assert!(counter.load(Ordering::SeqCst) >= 3);
        assert_eq!(scheduler.stats().failures(), 0);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_state_is_none_once_registration_ends() {
        let (store, scheduler, handle) = setup();
        let failing = RefreshFn::new(|| async { Err::<u32, _>(anyhow::anyhow!("down")) });
        register(&store, &scheduler, "exhausted", 200, failing);
        register(&store, &scheduler, "deleted", 10_000, counting(Arc::new(AtomicU32::new(0))));

        store.delete(&"deleted".into());
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(scheduler.state(&"exhausted".into()).await, None);
        assert_eq!(scheduler.state(&"deleted".into()).await, Some(RefreshState::Scheduled));
        assert_eq!(scheduler.state(&"never".into()).await, None);

        scheduler.cancel(&"deleted".into());
        assert_eq!(scheduler.state(&"deleted".into()).await, None);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_namespace() {
        let (store, scheduler, handle) = setup();
        let counter = Arc::new(AtomicU32::new(0));
        let receipt = store
            .set(("a", "k").into(), &0u32, WriteParams::with_ttl(10_000))
            .unwrap();
        scheduler.register(RefreshSpec {
            key: ("a", "k").into(),
            seq: receipt.seq,
            ttl_ms: 10_000,
            ttl_source: TtlSource::Fixed(10_000),
            compress: None,
            refresh: counting(Arc::clone(&counter)),
        });
        register(&store, &scheduler, "b-key", 10_000, counting(Arc::clone(&counter)));

        scheduler.cancel_namespace("a");
        assert_eq!(scheduler.state(&("a", "k").into()).await, None);
        assert!(scheduler.state(&"b-key".into()).await.is_some());
        assert_eq!(scheduler.stats().registered(), 1);

        scheduler.cancel_all();
        assert_eq!(scheduler.state(&"b-key".into()).await, None);

        scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_loop_stops_when_handles_dropped() {
        let (_store, scheduler, handle) = setup();
        drop(scheduler);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should stop")
            .unwrap();
    }
}
