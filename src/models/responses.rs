//! Metadata views returned by the cache
//!
//! Plain serializable snapshots; none of them hold a lock or a payload.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ttl::DataClass;

/// Metadata of a single entry, as returned by `entry_details`/`all_entries`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryDetails {
    pub key: String,
    pub namespace: String,
    /// Whether the payload is stored gzipped
    pub compressed: bool,
    /// Stored bytes (post-compression)
    pub size: usize,
    /// Serialized bytes before compression
    pub original_size: usize,
    pub access_count: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub ttl_remaining_ms: u64,
    /// Registered with the background refresher
    pub refreshable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_class: Option<DataClass>,
}

/// Aggregate statistics since the last `clear()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_entries: usize,
    /// Sum of stored entry sizes in bytes
    pub total_size: usize,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub compressed_entries: usize,
    /// Creation time of the most recently written entry
    pub newest_entry: Option<DateTime<Utc>>,
    pub oldest_entry: Option<DateTime<Utc>>,
    pub refresh_successes: u64,
    pub refresh_failures: u64,
    /// Entries currently registered for background refresh
    pub scheduled_refreshes: usize,
}

impl StatsSnapshot {
    /// Average stored entry size, 0 when empty.
    pub fn average_entry_size(&self) -> usize {
        if self.total_entries == 0 {
            0
        } else {
            self.total_size / self.total_entries
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_average_entry_size() {
        let snapshot = StatsSnapshot {
            total_entries: 4,
            total_size: 400,
            ..Default::default()
        };
        assert_eq!(snapshot.average_entry_size(), 100);
        assert_eq!(StatsSnapshot::default().average_entry_size(), 0);
    }

    #[test]
    fn test_stats_serialization() {
        let snapshot = StatsSnapshot {
            total_entries: 1,
            hit_rate: 0.5,
            miss_rate: 0.5,
            ..Default::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["total_entries"], 1);
        assert_eq!(json["hit_rate"], 0.5);
        assert!(json["newest_entry"].is_null());
    }
}
