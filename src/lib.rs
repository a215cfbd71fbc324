//! Smart Cache - an in-process caching engine for dashboard data
//!
//! Combines adaptive TTLs, LRU eviction, payload compression, an
//! invalidation bus and background refresh behind the [`SmartCache`] façade.

pub mod cache;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod manager;
pub mod models;
pub mod tasks;
pub mod ttl;

pub use cache::EntryKey;
pub use config::CacheConfig;
pub use error::{CacheError, Result};
pub use invalidation::{InvalidationBus, InvalidationEvent, InvalidationReason};
pub use manager::SmartCache;
pub use models::{EntryDetails, SetOptions, StatsSnapshot};
pub use tasks::{RefreshFn, RefreshState};
pub use ttl::{DataClass, SystemLoad, TtlContext, TtlEngine};
