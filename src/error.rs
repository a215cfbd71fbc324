//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror.
//!
//! Not-found is a normal outcome and is modelled as `Option::None` by the
//! store and the façade, never as an error variant.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Value could not be serialized for storage
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Stored payload could not be decoded as the requested type
    #[error("Deserialization failed: {0}")]
    Deserialization(String),

    /// Gzip encoding or decoding failed
    #[error("Compression failed: {0}")]
    Compression(String),

    /// Key is empty or too long
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Stored representation can never fit within the configured byte bound
    #[error("Entry of {size} bytes exceeds cache size limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    /// A refresh callback returned an error
    #[error("Refresh failed: {0}")]
    RefreshFailed(String),

    /// A refresh callback did not complete in time
    #[error("Refresh timed out after {0}ms")]
    RefreshTimeout(u64),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true for failures of a background refresh attempt.
    pub fn is_refresh_failure(&self) -> bool {
        matches!(
            self,
            CacheError::RefreshFailed(_) | CacheError::RefreshTimeout(_)
        )
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CacheError::EntryTooLarge {
            size: 2048,
            limit: 1024,
        };
        assert_eq!(
            err.to_string(),
            "Entry of 2048 bytes exceeds cache size limit of 1024 bytes"
        );
        assert_eq!(
            CacheError::RefreshTimeout(250).to_string(),
            "Refresh timed out after 250ms"
        );
    }

    #[test]
    fn test_refresh_failure_classification() {
        assert!(CacheError::RefreshFailed("boom".into()).is_refresh_failure());
        assert!(CacheError::RefreshTimeout(10).is_refresh_failure());
        assert!(!CacheError::InvalidKey("".into()).is_refresh_failure());
    }
}
