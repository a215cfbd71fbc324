//! Cache Entry Module
//!
//! Defines the key type and the structure for individual cache entries.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::{EncodedValue, MAX_TTL_MS};
use crate::models::EntryDetails;
use crate::ttl::DataClass;

/// Namespace used when the caller does not name one.
pub const DEFAULT_NAMESPACE: &str = "default";

// == Entry Key ==
/// Fully qualified key: a key is unique within its namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryKey {
    pub namespace: String,
    pub key: String,
}

impl EntryKey {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Key in the default namespace.
    pub fn in_default(key: impl Into<String>) -> Self {
        Self::new(DEFAULT_NAMESPACE, key)
    }
}

impl From<&str> for EntryKey {
    fn from(key: &str) -> Self {
        Self::in_default(key)
    }
}

impl From<String> for EntryKey {
    fn from(key: String) -> Self {
        Self::in_default(key)
    }
}

/// `(namespace, key)`
impl From<(&str, &str)> for EntryKey {
    fn from((namespace, key): (&str, &str)) -> Self {
        Self::new(namespace, key)
    }
}

impl From<&EntryKey> for EntryKey {
    fn from(key: &EntryKey) -> Self {
        key.clone()
    }
}

impl fmt::Display for EntryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.key)
    }
}

// == Cache Entry ==
/// A stored value with its metadata.
///
/// Access bookkeeping is atomic so that reads only need a shared lock on the
/// store.
#[derive(Debug)]
pub struct CacheEntry {
    pub key: EntryKey,
    /// Stored representation (gzip when `compressed`)
    pub payload: Vec<u8>,
    pub compressed: bool,
    /// Length of `payload`
    pub size: usize,
    /// Serialized length before compression
    pub original_size: usize,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Expiration timestamp (Unix milliseconds), always after `created_at`
    pub expires_at: u64,
    pub ttl_ms: u64,
    /// Write sequence; changes on every write of this key
    pub seq: u64,
    pub refreshable: bool,
    pub data_class: Option<DataClass>,
    access_count: AtomicU64,
    last_accessed_at: AtomicU64,
    last_access_tick: AtomicU64,
}

impl CacheEntry {
    // == Constructor ==
    /// Creates an entry written at `now`. A zero TTL is raised to 1ms so the
    /// entry is never born expired; TTLs above [`MAX_TTL_MS`] are capped.
    pub fn new(key: EntryKey, value: EncodedValue, ttl_ms: u64, now: u64, seq: u64) -> Self {
        let ttl_ms = ttl_ms.clamp(1, MAX_TTL_MS);
        Self {
            key,
            size: value.bytes.len(),
            original_size: value.original_size,
            compressed: value.compressed,
            payload: value.bytes,
            created_at: now,
            expires_at: now.saturating_add(ttl_ms),
            ttl_ms,
            seq,
            refreshable: false,
            data_class: None,
            access_count: AtomicU64::new(0),
            last_accessed_at: AtomicU64::new(now),
            last_access_tick: AtomicU64::new(seq),
        }
    }

    pub fn with_refreshable(mut self, refreshable: bool) -> Self {
        self.refreshable = refreshable;
        self
    }

    pub fn with_data_class(mut self, data_class: Option<DataClass>) -> Self {
        self.data_class = data_class;
        self
    }

    /// Carries access history over from the version this entry replaces.
    pub fn inherit_access(&self, previous: &CacheEntry) {
        self.access_count
            .store(previous.access_count(), Ordering::Relaxed);
        self.last_accessed_at
            .store(previous.last_accessed_at(), Ordering::Relaxed);
        self.last_access_tick
            .store(previous.last_access_tick(), Ordering::Relaxed);
    }

    // == Is Expired ==
    /// An entry is expired once `now >= expires_at`.
    pub fn is_expired_at(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp_ms())
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&self, tick: u64, now: u64) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_accessed_at.fetch_max(now, Ordering::Relaxed);
        self.last_access_tick.fetch_max(tick, Ordering::Relaxed);
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_accessed_at(&self) -> u64 {
        self.last_accessed_at.load(Ordering::Relaxed)
    }

    /// Logical recency; strictly ordered across all entries of a store.
    pub fn last_access_tick(&self) -> u64 {
        self.last_access_tick.load(Ordering::Relaxed)
    }

    // == Time To Live ==
    /// Returns remaining TTL in milliseconds, 0 once expired.
    pub fn ttl_remaining_ms(&self) -> u64 {
        self.expires_at.saturating_sub(current_timestamp_ms())
    }

    // == Metadata ==
    /// Snapshot of the entry's metadata, without the payload.
    pub fn details(&self) -> EntryDetails {
        EntryDetails {
            key: self.key.key.clone(),
            namespace: self.key.namespace.clone(),
            compressed: self.compressed,
            size: self.size,
            original_size: self.original_size,
            access_count: self.access_count(),
            created_at: timestamp_to_datetime(self.created_at),
            expires_at: timestamp_to_datetime(self.expires_at),
            last_accessed_at: timestamp_to_datetime(self.last_accessed_at()),
            ttl_remaining_ms: self.ttl_remaining_ms(),
            refreshable: self.refreshable,
            data_class: self.data_class,
        }
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Converts Unix milliseconds to a UTC datetime.
pub fn timestamp_to_datetime(ms: u64) -> DateTime<Utc> {
    i64::try_from(ms)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    fn raw(bytes: &[u8]) -> EncodedValue {
        EncodedValue {
            bytes: bytes.to_vec(),
            compressed: false,
            original_size: bytes.len(),
        }
    }

    #[test]
    fn test_entry_key_conversions() {
        assert_eq!(EntryKey::from("k"), EntryKey::new(DEFAULT_NAMESPACE, "k"));
        assert_eq!(EntryKey::from(("ns", "k")), EntryKey::new("ns", "k"));
        assert_eq!(EntryKey::new("ns", "k").to_string(), "ns:k");
    }

    #[test]
    fn test_huge_ttl_is_capped() {
        let now = current_timestamp_ms();
        let entry = CacheEntry::new("k".into(), raw(b"v"), u64::MAX, now, 1);

        assert_eq!(entry.ttl_ms, MAX_TTL_MS);
        assert_eq!(entry.expires_at, now + MAX_TTL_MS);
        assert!(!entry.is_expired_at(now));

        let details = entry.details();
        assert!(details.expires_at > details.created_at);
    }

    #[test]
    fn test_timestamp_to_datetime_saturates() {
        assert_eq!(timestamp_to_datetime(0).timestamp_millis(), 0);
        assert_eq!(timestamp_to_datetime(u64::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_entry_creation() {
        let now = current_timestamp_ms();
        let entry = CacheEntry::new("k".into(), raw(b"\"v\""), 60_000, now, 1);

        assert_eq!(entry.size, 3);
        assert_eq!(entry.expires_at, now + 60_000);
        assert!(entry.expires_at > entry.created_at);
        assert_eq!(entry.access_count(), 0);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_zero_ttl_never_born_expired() {
        let now = current_timestamp_ms();
        let entry = CacheEntry::new("k".into(), raw(b"1"), 0, now, 1);
        assert!(entry.expires_at > entry.created_at);
        assert!(!entry.is_expired_at(now));
    }

    #[test]
    fn test_entry_expiration() {
        let entry = CacheEntry::new("k".into(), raw(b"1"), 1000, current_timestamp_ms(), 1);

        assert!(!entry.is_expired());
        sleep(Duration::from_millis(1100));
        assert!(entry.is_expired());
        assert_eq!(entry.ttl_remaining_ms(), 0);
    }

    #[test]
    fn test_expiration_boundary_condition() {
        let entry = CacheEntry::new("k".into(), raw(b"1"), 10, 1_000, 1);
        assert!(!entry.is_expired_at(1_009));
        assert!(entry.is_expired_at(1_010));
    }

    #[test]
    fn test_touch_updates_access() {
        let entry = CacheEntry::new("k".into(), raw(b"1"), 1000, 100, 1);
        entry.touch(7, 150);
        entry.touch(9, 160);

        assert_eq!(entry.access_count(), 2);
        assert_eq!(entry.last_accessed_at(), 160);
        assert_eq!(entry.last_access_tick(), 9);
    }

    #[test]
    fn test_inherit_access() {
        let old = CacheEntry::new("k".into(), raw(b"1"), 1000, 100, 1);
        old.touch(5, 120);
        let new = CacheEntry::new("k".into(), raw(b"2"), 1000, 200, 6);
        new.inherit_access(&old);

        assert_eq!(new.access_count(), 1);
        assert_eq!(new.last_access_tick(), 5);
    }

    #[test]
    fn test_details() {
        let entry = CacheEntry::new(("ns", "k").into(), raw(b"123"), 5000, current_timestamp_ms(), 1)
            .with_refreshable(true)
            .with_data_class(Some(DataClass::Realtime));
        let details = entry.details();

        assert_eq!(details.namespace, "ns");
        assert_eq!(details.key, "k");
        assert_eq!(details.size, 3);
        assert!(!details.compressed);
        assert!(details.refreshable);
        assert_eq!(details.data_class, Some(DataClass::Realtime));
    }
}
