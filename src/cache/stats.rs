//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//! Counters are atomic so concurrent readers never lose updates.

use std::sync::atomic::{AtomicU64, Ordering};

// == Cache Stats ==
/// Lock-free performance counters of an entry store.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Successful reads
    hits: AtomicU64,
    /// Reads of absent or expired keys
    misses: AtomicU64,
    /// Entries removed to honour capacity bounds
    evictions: AtomicU64,
    /// Entries removed because their TTL elapsed
    expirations: AtomicU64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    pub fn expirations(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    // == Rates ==
    /// Returns `(hit_rate, miss_rate)`; both are 0.0 before any read.
    pub fn rates(&self) -> (f64, f64) {
        let hits = self.hits();
        let misses = self.misses();
        let total = hits + misses;
        if total == 0 {
            (0.0, 0.0)
        } else {
            let hit_rate = hits as f64 / total as f64;
            (hit_rate, misses as f64 / total as f64)
        }
    }

    // == Reset ==
    /// Zeroes every counter.
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}
