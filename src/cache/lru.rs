//! LRU Ordering Module
//!
//! Logical access clock and least-recently-used victim selection.
//!
//! Every write and every successful read stamps the entry with a tick from a
//! single monotonic counter. Wall-clock `last_accessed_at` values can collide
//! within a millisecond; ticks cannot, so two entries read in the same
//! millisecond still evict in the order they were touched, and entries never
//! read since insertion evict in insertion order.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::cache::{CacheEntry, EntryKey};

// == Access Clock ==
/// Monotonic source of ticks and write sequence numbers.
#[derive(Debug)]
pub struct AccessClock {
    next: AtomicU64,
}

impl AccessClock {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a fresh tick, strictly greater than every previous one.
    pub fn tick(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for AccessClock {
    fn default() -> Self {
        Self::new()
    }
}

// == Eviction Order ==
/// Returns candidate keys from least to most recently used, skipping `protect`.
pub fn eviction_order<'a, I>(entries: I, protect: Option<&EntryKey>) -> Vec<EntryKey>
where
    I: IntoIterator<Item = (&'a EntryKey, &'a CacheEntry)>,
{
    let mut candidates: Vec<(u64, u64, &EntryKey)> = entries
        .into_iter()
        .filter(|(key, _)| Some(*key) != protect)
        .map(|(key, entry)| (entry.last_access_tick(), entry.seq, key))
        .collect();

    candidates.sort_unstable_by_key(|(tick, seq, _)| (*tick, *seq));
    candidates.into_iter().map(|(_, _, key)| key.clone()).collect()
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::EncodedValue;
    use std::collections::HashMap;

    fn entry(clock: &AccessClock, key: &str) -> (EntryKey, CacheEntry) {
        let key = EntryKey::from(key);
        let value = EncodedValue {
            bytes: b"1".to_vec(),
            compressed: false,
            original_size: 1,
        };
        let entry = CacheEntry::new(key.clone(), value, 60_000, 0, clock.tick());
        (key, entry)
    }

    #[test]
    fn test_clock_is_monotonic() {
        let clock = AccessClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }

    #[test]
    fn test_insertion_order_without_reads() {
        let clock = AccessClock::new();
        let entries: HashMap<_, _> = ["a", "b", "c"].iter().map(|k| entry(&clock, k)).collect();

        let order = eviction_order(&entries, None);
        let keys: Vec<&str> = order.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_touch_moves_to_back() {
        let clock = AccessClock::new();
        let entries: HashMap<_, _> = ["a", "b", "c"].iter().map(|k| entry(&clock, k)).collect();

        // Same wall-clock millisecond, different ticks
        entries[&EntryKey::from("a")].touch(clock.tick(), 0);

        let order = eviction_order(&entries, None);
        let keys: Vec<&str> = order.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_order_after_multiple_touches() {
        let clock = AccessClock::new();
        let entries: HashMap<_, _> = ["a", "b", "c"].iter().map(|k| entry(&clock, k)).collect();

        for key in ["a", "c", "b"] {
            entries[&EntryKey::from(key)].touch(clock.tick(), 0);
        }

        let order = eviction_order(&entries, None);
        let keys: Vec<&str> = order.iter().map(|k| k.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c", "b"]);
    }

    #[test]
    fn test_protected_key_excluded() {
        let clock = AccessClock::new();
        let entries: HashMap<_, _> = ["a", "b"].iter().map(|k| entry(&clock, k)).collect();

        let order = eviction_order(&entries, Some(&EntryKey::from("a")));
        assert_eq!(order, vec![EntryKey::from("b")]);
    }

    #[test]
    fn test_empty() {
        let entries: HashMap<EntryKey, CacheEntry> = HashMap::new();
        assert!(eviction_order(&entries, None).is_empty());
    }
}
