//! Smart Cache service
//!
//! Runs one cache instance with a sample refreshable dashboard entry and logs
//! its statistics until interrupted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use smart_cache::{CacheConfig, SetOptions, SmartCache};

/// Interval between two statistics reports.
const STATS_INTERVAL: Duration = Duration::from_secs(30);

/// Main entry point for the cache service.
///
/// # Startup Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache and its background tasks
/// 4. Register a sample refreshable dashboard entry
/// 5. Log statistics periodically until SIGINT/SIGTERM
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "smart_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Smart Cache service");

    let config = CacheConfig::from_env();
    info!(
        max_entries = config.max_entries,
        max_size_bytes = config.max_size_bytes,
        default_ttl_ms = config.default_ttl_ms,
        refresh_ratio = config.refresh_ratio,
        "Configuration loaded"
    );

    let cache = Arc::new(SmartCache::new(config)?);

    let polls = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&polls);
    cache.set(
        ("dashboard", "overview"),
        &json!({ "panels": [], "poll": 0 }),
        SetOptions::new()
            .data_type("critical-dashboard-data")
            .refresh_with(move || {
                let counter = Arc::clone(&counter);
                async move {
                    let poll = counter.fetch_add(1, Ordering::Relaxed) + 1;
                    Ok(json!({ "panels": [], "poll": poll }))
                }
            }),
    )?;
    info!("Sample dashboard entry registered for background refresh");

    let reporter = {
        let cache = Arc::clone(&cache);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(STATS_INTERVAL);
            loop {
                interval.tick().await;
                let stats = cache.stats();
                info!(
                    entries = stats.total_entries,
                    size = stats.total_size,
                    hit_rate = stats.hit_rate,
                    refreshes = stats.refresh_successes,
                    refresh_failures = stats.refresh_failures,
                    "Cache statistics"
                );
            }
        })
    };

    shutdown_signal().await?;

    reporter.abort();
    cache.shutdown().await;
    info!(polls = polls.load(Ordering::Relaxed), "Service shutdown complete");
    Ok(())
}

/// Waits for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate.recv() => {
                info!("Received SIGTERM, initiating shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, initiating shutdown...");
    }

    Ok(())
}
