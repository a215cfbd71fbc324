//! Background Tasks Module
//!
//! Contains the tasks that run alongside the cache.
//!
//! # Tasks
//! - Background refresh: recomputes refreshable entries before they expire
//! - Expired sweep: optionally removes expired entries at a fixed interval

mod cleanup;
mod refresher;

pub use cleanup::spawn_cleanup_task;
pub use refresher::{
    RefreshFn, RefreshFuture, RefreshScheduler, RefreshSettings, RefreshSpec, RefreshState,
    RefreshStats,
};
