//! Expired Entry Sweep
//!
//! Background task that periodically removes expired entries that nobody
//! reads anymore. Lazy expiration on access stays the primary mechanism; the
//! sweep only reclaims memory held by abandoned keys.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::EntryStore;
use crate::tasks::RefreshScheduler;

/// Spawns a background task that periodically sweeps expired entries.
///
/// Refresh registrations of swept entries are cancelled.
///
/// # Arguments
/// * `store` - Shared entry store
/// * `refresher` - Handle used to cancel refreshes of swept entries
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
pub fn spawn_cleanup_task(
    store: Arc<EntryStore>,
    refresher: RefreshScheduler,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting expired entry sweep"
        );

        loop {
            tokio::time::sleep(interval).await;

            let expired = store.cleanup_expired();
            for key in &expired {
                refresher.cancel(key);
            }

            if expired.is_empty() {
                debug!("Expired sweep: nothing to remove");
            } else {
                info!(removed = expired.len(), "Expired sweep removed entries");
            }
        }
    })
}
