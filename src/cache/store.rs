//! Entry Store Module
//!
//! Main cache engine combining HashMap storage with LRU eviction, size
//! accounting, payload compression and lazy TTL expiration.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::cache::lru::{eviction_order, AccessClock};
use crate::cache::{
    codec, current_timestamp_ms, timestamp_to_datetime, CacheEntry, CacheStats, EncodedValue,
    EntryKey, MAX_KEY_LENGTH,
};
use crate::error::{CacheError, Result};
use crate::models::{EntryDetails, StatsSnapshot};
use crate::ttl::DataClass;

// == Write Parameters ==
/// Resolved parameters of a write; the TTL is decided by the caller.
#[derive(Debug, Clone, Default)]
pub struct WriteParams {
    pub ttl_ms: u64,
    pub compress: Option<bool>,
    pub refreshable: bool,
    pub data_class: Option<DataClass>,
}

impl WriteParams {
    pub fn with_ttl(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            ..Default::default()
        }
    }
}

// == Write Receipt ==
/// Outcome of a successful write.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    /// Write sequence of the stored version
    pub seq: u64,
    pub created_at: u64,
    pub expires_at: u64,
    pub ttl_ms: u64,
    pub size: usize,
    pub compressed: bool,
    /// Keys evicted to make room
    pub evicted: Vec<EntryKey>,
}

/// Identity of the live version of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryVersion {
    pub seq: u64,
    pub expires_at: u64,
}

/// Version of a refreshable entry removed because it expired.
#[derive(Debug, Clone, Copy)]
struct Lapsed {
    seq: u64,
    data_class: Option<DataClass>,
}

#[derive(Debug, Default)]
struct StoreInner {
    entries: HashMap<EntryKey, CacheEntry>,
    total_size: usize,
    lapsed: HashMap<EntryKey, Lapsed>,
}

impl StoreInner {
    fn insert(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.lapsed.remove(&entry.key);
        self.total_size += entry.size;
        let previous = self.entries.insert(entry.key.clone(), entry);
        if let Some(old) = &previous {
            self.total_size -= old.size;
        }
        previous
    }

    fn remove(&mut self, key: &EntryKey) -> Option<CacheEntry> {
        self.lapsed.remove(key);
        let removed = self.entries.remove(key);
        if let Some(entry) = &removed {
            self.total_size -= entry.size;
        }
        removed
    }

    /// Removes an expired entry, remembering its version if a refresh may
    /// still be in flight for it.
    fn lapse(&mut self, key: &EntryKey) {
        if let Some(entry) = self.remove(key) {
            if entry.refreshable {
                self.lapsed.insert(
                    key.clone(),
                    Lapsed {
                        seq: entry.seq,
                        data_class: entry.data_class,
                    },
                );
            }
        }
    }
}

// == Entry Store ==
/// Thread-safe cache storage.
///
/// Reads take a shared lock and record access through atomics, so they never
/// block each other. Writes, deletes and evictions take the exclusive lock.
#[derive(Debug)]
pub struct EntryStore {
    inner: RwLock<StoreInner>,
    stats: CacheStats,
    clock: AccessClock,
    max_entries: usize,
    max_size_bytes: usize,
    compression_threshold: usize,
}

impl EntryStore {
    // == Constructor ==
    /// Creates a store bounded by entry count and total stored bytes.
    pub fn new(max_entries: usize, max_size_bytes: usize, compression_threshold: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            stats: CacheStats::new(),
            clock: AccessClock::new(),
            max_entries: max_entries.max(1),
            max_size_bytes: max_size_bytes.max(1),
            compression_threshold,
        }
    }

    pub fn from_config(config: &crate::config::CacheConfig) -> Self {
        Self::new(
            config.max_entries,
            config.max_size_bytes,
            config.compression_threshold,
        )
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // == Set ==
    /// Serializes and stores a value, replacing any previous version.
    ///
    /// Fails without touching the store if the value cannot be serialized,
    /// the key is invalid, or the stored form alone exceeds the byte bound.
    pub fn set<T: Serialize + ?Sized>(
        &self,
        key: EntryKey,
        value: &T,
        params: WriteParams,
    ) -> Result<WriteReceipt> {
        let encoded = codec::encode(value, self.compression_threshold, params.compress)?;
        self.set_encoded(key, encoded, params)
    }

    /// Stores an already encoded value.
    pub fn set_encoded(
        &self,
        key: EntryKey,
        encoded: EncodedValue,
        params: WriteParams,
    ) -> Result<WriteReceipt> {
        validate_key(&key)?;
        self.check_fits(&encoded)?;

        let now = current_timestamp_ms();
        let entry = CacheEntry::new(key.clone(), encoded, params.ttl_ms, now, self.clock.tick())
            .with_refreshable(params.refreshable)
            .with_data_class(params.data_class);
        let receipt = receipt_for(&entry);

        let mut inner = self.write();
        inner.insert(entry);
        let evicted = self.evict_to_fit(&mut inner, &key, now);

        debug!(key = %key, size = receipt.size, compressed = receipt.compressed, ttl_ms = receipt.ttl_ms, "Stored entry");
        Ok(WriteReceipt { evicted, ..receipt })
    }

    // == Replace If Current ==
    /// Refreshes a value in place if `key` still holds version `expected_seq`.
    /// Access history is preserved.
    ///
    /// A refreshable version that expired while its refresh was running is
    /// restored. Returns `Ok(None)` when the entry was deleted, replaced,
    /// evicted or invalidated in the meantime.
    pub fn replace_if_current(
        &self,
        key: &EntryKey,
        expected_seq: u64,
        encoded: EncodedValue,
        ttl_ms: u64,
    ) -> Result<Option<WriteReceipt>> {
        self.check_fits(&encoded)?;
        let now = current_timestamp_ms();

        let mut inner = self.write();
        let (refreshable, data_class) = match inner.entries.get(key) {
            Some(current) if current.seq == expected_seq => {
                (current.refreshable, current.data_class)
            }
            Some(_) => return Ok(None),
            None => match inner.lapsed.get(key) {
                Some(lapsed) if lapsed.seq == expected_seq => {
                    debug!(key = %key, "Restoring entry that expired during refresh");
                    (true, lapsed.data_class)
                }
                _ => return Ok(None),
            },
        };

        let entry = CacheEntry::new(key.clone(), encoded, ttl_ms, now, self.clock.tick())
            .with_refreshable(refreshable)
            .with_data_class(data_class);
        let receipt = receipt_for(&entry);
        if let Some(previous) = inner.insert(entry) {
            if let Some(current) = inner.entries.get(key) {
                current.inherit_access(&previous);
            }
        }
        let evicted = self.evict_to_fit(&mut inner, key, now);

        debug!(key = %key, seq = receipt.seq, "Refreshed entry in place");
        Ok(Some(WriteReceipt { evicted, ..receipt }))
    }

    // == Get ==
    /// Retrieves and decodes a value.
    ///
    /// Returns `Ok(None)` for absent or expired keys; expired entries are
    /// removed on the spot. A cached JSON `null` is returned as `Some`.
    pub fn get<T: DeserializeOwned>(&self, key: &EntryKey) -> Result<Option<T>> {
        let now = current_timestamp_ms();
        {
            let inner = self.read();
            match inner.entries.get(key) {
                None => {
                    self.stats.record_miss();
                    return Ok(None);
                }
                Some(entry) if !entry.is_expired_at(now) => {
                    entry.touch(self.clock.tick(), now);
                    self.stats.record_hit();
                    return codec::decode(&entry.payload, entry.compressed).map(Some);
                }
                Some(_) => {}
            }
        }

        self.expire(key, now);
        self.stats.record_miss();
        Ok(None)
    }

    // == Has ==
    /// Returns true if a live entry exists. Counts as an access.
    pub fn has(&self, key: &EntryKey) -> bool {
        let now = current_timestamp_ms();
        {
            let inner = self.read();
            match inner.entries.get(key) {
                None => {
                    self.stats.record_miss();
                    return false;
                }
                Some(entry) if !entry.is_expired_at(now) => {
                    entry.touch(self.clock.tick(), now);
                    self.stats.record_hit();
                    return true;
                }
                Some(_) => {}
            }
        }

        self.expire(key, now);
        self.stats.record_miss();
        false
    }

    /// Removes `key` if it is still expired under the exclusive lock.
    fn expire(&self, key: &EntryKey, now: u64) {
        let mut inner = self.write();
        if inner
            .entries
            .get(key)
            .is_some_and(|entry| entry.is_expired_at(now))
        {
            inner.lapse(key);
            self.stats.record_expirations(1);
            debug!(key = %key, "Lazily expired entry");
        }
    }

    /// Marks version `seq` of `key` as no longer kept fresh. An expired copy
    /// of that version is forgotten and can no longer be restored.
    pub fn release_refresh(&self, key: &EntryKey, seq: u64) {
        let mut inner = self.write();
        if inner.lapsed.get(key).is_some_and(|lapsed| lapsed.seq == seq) {
            inner.lapsed.remove(key);
        }
        if let Some(entry) = inner.entries.get_mut(key) {
            if entry.seq == seq {
                entry.refreshable = false;
            }
        }
    }

    // == Delete ==
    /// Removes an entry. Returns true if it existed.
    pub fn delete(&self, key: &EntryKey) -> bool {
        self.write().remove(key).is_some()
    }

    // == Clear ==
    /// Removes every entry and resets statistics. Returns the count removed.
    pub fn clear(&self) -> usize {
        let mut inner = self.write();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.lapsed.clear();
        inner.total_size = 0;
        self.stats.reset();
        count
    }

    // == Invalidate Namespace ==
    /// Removes every entry of `namespace`. Returns the count removed.
    pub fn invalidate_namespace(&self, namespace: &str) -> usize {
        let mut inner = self.write();
        let doomed: Vec<EntryKey> = inner
            .entries
            .keys()
            .filter(|key| key.namespace == namespace)
            .cloned()
            .collect();
        for key in &doomed {
            inner.remove(key);
        }
        inner.lapsed.retain(|key, _| key.namespace != namespace);
        doomed.len()
    }

    // == Cleanup Expired ==
    /// Removes all expired entries and returns their keys.
    pub fn cleanup_expired(&self) -> Vec<EntryKey> {
        let now = current_timestamp_ms();
        let mut inner = self.write();
        let expired: Vec<EntryKey> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            inner.lapse(key);
        }
        self.stats.record_expirations(expired.len() as u64);
        expired
    }

    // == Version ==
    /// Returns the live version of `key` without counting an access.
    pub fn version(&self, key: &EntryKey) -> Option<EntryVersion> {
        let now = current_timestamp_ms();
        self.read()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(|entry| EntryVersion {
                seq: entry.seq,
                expires_at: entry.expires_at,
            })
    }

    // == Entry Details ==
    /// Returns metadata of a live entry without counting an access.
    pub fn entry_details(&self, key: &EntryKey) -> Option<EntryDetails> {
        let now = current_timestamp_ms();
        self.read()
            .entries
            .get(key)
            .filter(|entry| !entry.is_expired_at(now))
            .map(CacheEntry::details)
    }

    /// Metadata of every live entry, ordered by namespace then key.
    pub fn all_entries(&self) -> Vec<EntryDetails> {
        let now = current_timestamp_ms();
        let inner = self.read();
        let mut details: Vec<EntryDetails> = inner
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .map(CacheEntry::details)
            .collect();
        details.sort_by(|a, b| (&a.namespace, &a.key).cmp(&(&b.namespace, &b.key)));
        details
    }

    // == Stats ==
    /// Returns current store statistics over live entries, the same view as
    /// [`all_entries`](Self::all_entries). Refresh counters are left at zero.
    pub fn stats(&self) -> StatsSnapshot {
        let now = current_timestamp_ms();
        let inner = self.read();
        let live: Vec<&CacheEntry> = inner
            .entries
            .values()
            .filter(|entry| !entry.is_expired_at(now))
            .collect();
        let (hit_rate, miss_rate) = self.stats.rates();
        let newest = live.iter().map(|e| e.created_at).max();
        let oldest = live.iter().map(|e| e.created_at).min();

        StatsSnapshot {
            total_entries: live.len(),
            total_size: live.iter().map(|e| e.size).sum(),
            hit_rate,
            miss_rate,
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            expirations: self.stats.expirations(),
            compressed_entries: live.iter().filter(|e| e.compressed).count(),
            newest_entry: newest.map(timestamp_to_datetime),
            oldest_entry: oldest.map(timestamp_to_datetime),
            ..Default::default()
        }
    }

    // == Length ==
    /// Returns the current number of stored entries, expired ones not yet
    /// removed included.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Sum of stored entry sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.read().total_size
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_size_bytes(&self) -> usize {
        self.max_size_bytes
    }

    fn check_fits(&self, encoded: &EncodedValue) -> Result<()> {
        if encoded.size() > self.max_size_bytes {
            return Err(CacheError::EntryTooLarge {
                size: encoded.size(),
                limit: self.max_size_bytes,
            });
        }
        Ok(())
    }

    // == Eviction ==
    /// Restores the capacity bounds without ever removing `protect`.
    ///
    /// Expired entries go first, then live ones in least-recently-used order.
    fn evict_to_fit(
        &self,
        inner: &mut StoreInner,
        protect: &EntryKey,
        now: u64,
    ) -> Vec<EntryKey> {
        if self.within_bounds(inner) {
            return Vec::new();
        }

        let expired: Vec<EntryKey> = inner
            .entries
            .iter()
            .filter(|(key, entry)| *key != protect && entry.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        self.stats.record_expirations(expired.len() as u64);

        let mut evicted = expired;
        if self.within_bounds(inner) {
            return evicted;
        }

        for key in eviction_order(&inner.entries, Some(protect)) {
            if self.within_bounds(inner) {
                break;
            }
            inner.remove(&key);
            self.stats.record_eviction();
            debug!(key = %key, "Evicted least recently used entry");
            evicted.push(key);
        }
        evicted
    }

    fn within_bounds(&self, inner: &StoreInner) -> bool {
        inner.entries.len() <= self.max_entries && inner.total_size <= self.max_size_bytes
    }
}

fn receipt_for(entry: &CacheEntry) -> WriteReceipt {
    WriteReceipt {
        seq: entry.seq,
        created_at: entry.created_at,
        expires_at: entry.expires_at,
        ttl_ms: entry.ttl_ms,
        size: entry.size,
        compressed: entry.compressed,
        evicted: Vec::new(),
    }
}

fn validate_key(key: &EntryKey) -> Result<()> {
    if key.key.is_empty() {
        return Err(CacheError::InvalidKey("Key cannot be empty".to_string()));
    }
    if key.key.len() > MAX_KEY_LENGTH {
        return Err(CacheError::InvalidKey(format!(
            "Key exceeds maximum length of {} bytes",
            MAX_KEY_LENGTH
        )));
    }
    Ok(())
}
