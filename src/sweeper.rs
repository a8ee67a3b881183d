// src/sweeper.rs
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::aggregate::Aggregator;

/// Spawn the periodic hygiene task: expired cache entries (fresh and
/// last-known-good) and idle limiter buckets. Reads self-police freshness,
/// so this only bounds memory.
pub fn spawn_sweeper(aggregator: Arc<Aggregator>, interval_secs: u64) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick fires immediately; nothing to sweep at boot.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let report = aggregator.sweep_at(chrono::Utc::now());
            tracing::debug!(
                target: "cache",
                fresh = report.fresh_removed,
                stale = report.stale_removed,
                buckets = report.buckets_pruned,
                "sweep finished"
            );
        }
    })
}
