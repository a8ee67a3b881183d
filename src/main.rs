//! Portal Aggregator — Binary Entrypoint
//! Boots the Axum HTTP server: config, shared aggregator, sweeper, metrics.

use std::sync::Arc;

use portal_aggregator::{api, config::AppConfig, metrics::Metrics, sweeper};
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// JSON logs when AGGREGATOR_LOG_JSON=1, compact otherwise.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("aggregate=info,ingest=info,rate_limit=info,cache=info,warn"));

    let json = std::env::var("AGGREGATOR_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    // Shuttle may already have installed a subscriber; keep theirs if so.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = AppConfig::load_default()?;
    let metrics = Metrics::init(cfg.cache.ttl_secs)?;

    let aggregator = Arc::new(cfg.build_aggregator()?);
    sweeper::spawn_sweeper(Arc::clone(&aggregator), cfg.cache.sweep_interval_secs);

    let router = api::router(api::AppState::new(aggregator)).merge(metrics.router());

    Ok(router.into())
}
