//! Cache Module
//!
//! Provides the in-memory entry store: namespaced keys, TTL expiration,
//! LRU eviction under entry-count and byte bounds, and payload compression.

mod codec;
mod entry;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use codec::{decode, encode, EncodedValue};
pub use entry::{
    current_timestamp_ms, timestamp_to_datetime, CacheEntry, EntryKey, DEFAULT_NAMESPACE,
};
pub use lru::AccessClock;
pub use stats::CacheStats;
pub use store::{EntryStore, EntryVersion, WriteParams, WriteReceipt};

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;

/// Default size in bytes above which serialized payloads are compressed
pub const COMPRESSION_THRESHOLD: usize = 1024;

/// Longest TTL an entry can carry (one year); longer ones are capped
pub const MAX_TTL_MS: u64 = 365 * 24 * 60 * 60 * 1000;
