//! Caller-facing models of the cache engine
//!
//! Write options accepted by the façade and the metadata views it returns.

pub mod options;
pub mod responses;

// Re-export commonly used types
pub use options::SetOptions;
pub use responses::{EntryDetails, StatsSnapshot};
