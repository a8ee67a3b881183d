// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod aggregate;
pub mod api;
pub mod cache;
pub mod config;
pub mod ingest;
pub mod merge;
pub mod metrics;
pub mod rate_limit;
pub mod relevance;
pub mod source_weights;
pub mod sweeper;

// Convenient access to the router: `portal_aggregator::router`
pub use crate::aggregate::{AggregateQuery, AggregationResult, Aggregator, CacheStatus};
pub use crate::api::router;

use std::sync::Arc;

/// Build the full HTTP app from config: aggregator, API routes, no metrics
/// recorder (tests install their own or none).
pub fn app_from_config(cfg: &config::AppConfig) -> anyhow::Result<shuttle_axum::axum::Router> {
    let aggregator = Arc::new(cfg.build_aggregator()?);
    Ok(api::router(api::AppState::new(aggregator)))
}
