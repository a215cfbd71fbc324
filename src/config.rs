//! Configuration Module
//!
//! Handles loading and managing cache configuration from environment variables.

use std::env;
use std::str::FromStr;

use crate::cache::COMPRESSION_THRESHOLD;
use crate::ttl::TtlPolicy;

/// Cache engine configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries the store can hold
    pub max_entries: usize,
    /// Maximum total size in bytes of stored payloads
    pub max_size_bytes: usize,
    /// Default TTL in milliseconds when neither an explicit TTL nor a data class is given
    pub default_ttl_ms: u64,
    /// Serialized payloads larger than this many bytes are compressed
    pub compression_threshold: usize,
    /// Fraction of the TTL after which a background refresh fires
    pub refresh_ratio: f64,
    /// Upper bound for a single refresh callback invocation
    pub refresh_timeout_ms: u64,
    /// Attempts per refresh cycle before giving up until natural expiry
    pub refresh_max_attempts: u32,
    /// Base delay of the exponential retry backoff
    pub refresh_backoff_ms: u64,
    /// Interval of the expired-entry sweep, 0 disables it
    pub cleanup_interval_ms: u64,
    /// Adaptive TTL policy tables
    pub ttl_policy: TtlPolicy,
}

impl CacheConfig {
    /// Creates a new CacheConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_MAX_ENTRIES` - Maximum entries (default: 1000)
    /// - `CACHE_MAX_SIZE_BYTES` - Maximum total payload bytes (default: 50 MiB)
    /// - `CACHE_DEFAULT_TTL_MS` - Default TTL in ms (default: 300000)
    /// - `CACHE_COMPRESSION_THRESHOLD` - Compression threshold in bytes (default: 1024)
    /// - `CACHE_REFRESH_RATIO` - Refresh point as a fraction of TTL (default: 0.8)
    /// - `CACHE_REFRESH_TIMEOUT_MS` - Refresh callback timeout (default: 10000)
    /// - `CACHE_REFRESH_MAX_ATTEMPTS` - Refresh attempts per cycle (default: 3)
    /// - `CACHE_REFRESH_BACKOFF_MS` - Retry backoff base (default: 500)
    /// - `CACHE_CLEANUP_INTERVAL_MS` - Expired sweep interval, 0 = off (default: 0)
    /// - `CACHE_BUSINESS_HOURS` - Business hour range `start-end` (default: 8-18)
    /// - `CACHE_LOAD_MULTIPLIERS` - `low,medium,high` TTL multipliers (default: 1.0,1.25,1.5)
    /// - `CACHE_MIN_TTL_MS` - Floor for adaptive TTLs (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let mut ttl_policy = defaults.ttl_policy.clone();

        if let Some((start, end)) = env::var("CACHE_BUSINESS_HOURS")
            .ok()
            .and_then(|v| parse_hour_range(&v))
        {
            ttl_policy.business_hours_start = start;
            ttl_policy.business_hours_end = end;
        }
        if let Some([low, medium, high]) = env::var("CACHE_LOAD_MULTIPLIERS")
            .ok()
            .and_then(|v| parse_multipliers(&v))
        {
            ttl_policy.load_multipliers.low = low;
            ttl_policy.load_multipliers.medium = medium;
            ttl_policy.load_multipliers.high = high;
        }
        ttl_policy.min_ttl_ms = env_or("CACHE_MIN_TTL_MS", ttl_policy.min_ttl_ms);

        let refresh_ratio = env_or("CACHE_REFRESH_RATIO", defaults.refresh_ratio);

        Self {
            max_entries: env_or("CACHE_MAX_ENTRIES", defaults.max_entries),
            max_size_bytes: env_or("CACHE_MAX_SIZE_BYTES", defaults.max_size_bytes),
            default_ttl_ms: env_or("CACHE_DEFAULT_TTL_MS", defaults.default_ttl_ms),
            compression_threshold: env_or(
                "CACHE_COMPRESSION_THRESHOLD",
                defaults.compression_threshold,
            ),
            refresh_ratio: if refresh_ratio > 0.0 && refresh_ratio < 1.0 {
                refresh_ratio
            } else {
                defaults.refresh_ratio
            },
            refresh_timeout_ms: env_or("CACHE_REFRESH_TIMEOUT_MS", defaults.refresh_timeout_ms),
            refresh_max_attempts: env_or(
                "CACHE_REFRESH_MAX_ATTEMPTS",
                defaults.refresh_max_attempts,
            ),
            refresh_backoff_ms: env_or("CACHE_REFRESH_BACKOFF_MS", defaults.refresh_backoff_ms),
            cleanup_interval_ms: env_or(
                "CACHE_CLEANUP_INTERVAL_MS",
                defaults.cleanup_interval_ms,
            ),
            ttl_policy,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            max_size_bytes: 50 * 1024 * 1024,
            default_ttl_ms: 300_000,
            compression_threshold: COMPRESSION_THRESHOLD,
            refresh_ratio: 0.8,
            refresh_timeout_ms: 10_000,
            refresh_max_attempts: 3,
            refresh_backoff_ms: 500,
            cleanup_interval_ms: 0,
            ttl_policy: TtlPolicy::default(),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

/// Parses `"8-18"` into `(8, 18)`. Hours must satisfy `start < end <= 24`.
fn parse_hour_range(raw: &str) -> Option<(u32, u32)> {
    let (start, end) = raw.trim().split_once('-')?;
    let start: u32 = start.trim().parse().ok()?;
    let end: u32 = end.trim().parse().ok()?;
    (start < end && end <= 24).then_some((start, end))
}

/// Parses `"1.0,1.25,1.5"` into three positive multipliers.
fn parse_multipliers(raw: &str) -> Option<[f64; 3]> {
    let values: Vec<f64> = raw
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .ok()?;
    match values.as_slice() {
        [low, medium, high] if values.iter().all(|m| m.is_finite() && *m > 0.0) => {
            Some([*low, *medium, *high])
        }
        _ => None,
    }
}
