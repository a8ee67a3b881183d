// src/ingest/fetcher.rs
//! Source Fetcher: one timeout-bounded HTTP GET per upstream, parsed into
//! `NormalizedItem`s. Failures come back as data (`SourceOutcome`), never as
//! errors crossing the aggregation boundary.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};

use crate::ingest::providers::{cms, rss, sponsored};
use crate::ingest::types::{
    FetchError, NormalizedItem, SourceConfig, SourceKind, SourceOutcome, SourceProvider,
    SourceStatus,
};
use crate::rate_limit::RateLimiter;

const USER_AGENT: &str = "portal-aggregator/0.1";

/// Shared HTTP client. Per-request timeouts come from each source's config.
pub fn build_http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(4))
        .build()?;
    Ok(client)
}

/// HTTP-backed provider: a `SourceConfig` plus the parser picked by its kind.
pub struct HttpSource {
    config: SourceConfig,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(config: SourceConfig, client: reqwest::Client) -> Self {
        Self { config, client }
    }

    pub fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn parse(&self, body: &str) -> Result<Vec<NormalizedItem>, FetchError> {
        match self.config.kind {
            SourceKind::Rss => rss::parse_feed(body, &self.config),
            SourceKind::Cms => cms::parse_payload(body, &self.config),
            SourceKind::Sponsored => sponsored::parse_payload(body, &self.config),
        }
    }
}

#[async_trait]
impl SourceProvider for HttpSource {
    async fn fetch_latest(&self) -> Result<Vec<NormalizedItem>, FetchError> {
        let timeout = self.config.timeout();
        let resp = self
            .client
            .get(&self.config.url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(timeout)
                } else {
                    FetchError::Network(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Http {
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(timeout)
            } else {
                FetchError::Body(e.to_string())
            }
        })?;
        self.parse(&body)
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn timeout(&self) -> Duration {
        self.config.timeout()
    }

    fn rate_limit_key(&self) -> &str {
        self.config.limit_key()
    }
}

/// Run one provider under its own timeout and turn the result into an outcome.
///
/// - A source already cooling down is skipped without a network call.
/// - HTTP 429 puts the source's bucket into cooldown for `cooldown_ms`.
pub async fn fetch_source(
    provider: &dyn SourceProvider,
    guard: &RateLimiter,
    cooldown_ms: u64,
) -> (Vec<NormalizedItem>, SourceOutcome) {
    let name = provider.name().to_string();
    let fetched_at = Utc::now();
    let t0 = Instant::now();

    let result = match guard.cooldown_until_at(provider.rate_limit_key(), fetched_at) {
        Some(until) => Err(FetchError::CoolingDown(until)),
        None => {
            let limit = provider.timeout();
            match tokio::time::timeout(limit, provider.fetch_latest()).await {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(limit)),
            }
        }
    };

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("aggregator_fetch_ms", "source" => name.clone()).record(ms);

    let (items, status, error_detail) = match result {
        Ok(items) => (items, SourceStatus::Success, None),
        Err(e) => {
            if e.is_throttled() {
                guard.enter_cooldown(provider.rate_limit_key(), cooldown_ms);
            }
            tracing::warn!(target: "ingest", source = %name, error = %e, elapsed_ms = ms as u64, "source fetch failed");
            (Vec::new(), e.status(), Some(e.to_string()))
        }
    };

    counter!(
        "aggregator_source_outcomes_total",
        "source" => name.clone(),
        "status" => status.as_str()
    )
    .increment(1);

    if status == SourceStatus::Success {
        tracing::debug!(target: "ingest", source = %name, items = items.len(), elapsed_ms = ms as u64, "source fetched");
    }

    let outcome = SourceOutcome {
        source_name: name,
        status,
        item_count: items.len(),
        error_detail,
        fetched_at,
        elapsed_ms: ms as u64,
    };
    (items, outcome)
}
