// src/aggregate.rs
//! # Aggregation Facade
//!
//! Entry point for every feed request:
//!
//! ```text
//! CHECK_CACHE ─hit──────────────────────────────────────────────► DONE
//!     │miss
//! CHECK_RATE_LIMIT ─limited─► stale copy │ static fallback │ empty ► DONE
//!     │allowed
//! FETCH ► SCORE_AND_MERGE ► WRITE_CACHE ────────────────────────► DONE
//! ```
//!
//! The caller always gets a well-formed `AggregationResult`; degraded states
//! show up in `cache_status`, `degraded` and the per-source outcomes.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::cache::TtlCache;
use crate::ingest::types::{NormalizedItem, SourceOutcome, SourceProvider, SourceStatus};
use crate::ingest::{ensure_metrics_described, run_once, run_single};
use crate::merge;
use crate::rate_limit::RateLimiter;
use crate::relevance::{RelevanceEngine, ScoreContext};
use crate::source_weights::SourceWeights;

/// Where a result came from. Surfaced as `X-Aggregator-Cache` by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    Stale,
    Fallback,
}

impl CacheStatus {
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Stale => "STALE",
            CacheStatus::Fallback => "FALLBACK",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationResult {
    pub feed: String,
    pub items: Vec<NormalizedItem>,
    /// One entry per organic source of the pass that produced `items`.
    pub source_outcomes: Vec<SourceOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsored_outcome: Option<SourceOutcome>,
    pub served_from_cache: bool,
    pub cache_status: CacheStatus,
    /// True when no fresh pass backs this result.
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl AggregationResult {
    fn empty(feed: &str, now: DateTime<Utc>, notice: &str) -> Self {
        Self {
            feed: feed.to_string(),
            items: Vec::new(),
            source_outcomes: Vec::new(),
            sponsored_outcome: None,
            served_from_cache: false,
            cache_status: CacheStatus::Fallback,
            degraded: true,
            notice: Some(notice.to_string()),
            generated_at: now,
        }
    }

    fn served_as(mut self, status: CacheStatus) -> Self {
        self.cache_status = status;
        self.served_from_cache = matches!(status, CacheStatus::Hit | CacheStatus::Stale);
        self.degraded = matches!(status, CacheStatus::Stale | CacheStatus::Fallback);
        self
    }

    fn with_notice(mut self, notice: &str) -> Self {
        self.notice = Some(notice.to_string());
        self
    }

    /// Organic sources that answered successfully in the backing pass.
    pub fn succeeded_sources(&self) -> usize {
        self.source_outcomes
            .iter()
            .filter(|o| o.status == SourceStatus::Success)
            .count()
    }
}

/// Post-merge view options. Applied to a copy; cached results stay unfiltered.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregateQuery {
    pub limit: Option<usize>,
    pub category: Option<String>,
    #[serde(alias = "lang")]
    pub language: Option<String>,
}

impl AggregateQuery {
    /// Sponsored items past their window are dropped here too, since a cached
    /// result can outlive a campaign. The category filter skips sponsored
    /// items; untagged items pass the language filter.
    fn apply(&self, mut result: AggregationResult, now: DateTime<Utc>) -> AggregationResult {
        let category = self.category.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let language = self.language.as_deref().map(str::trim).filter(|l| !l.is_empty());

        result.items.retain(|it| {
            if it.is_sponsored() && !it.is_active_at(now) {
                return false;
            }
            if let Some(c) = category {
                if !it.is_sponsored() && !it.category.eq_ignore_ascii_case(c) {
                    return false;
                }
            }
            if let Some(l) = language {
                if !it.language.is_empty() && !it.language.eq_ignore_ascii_case(l) {
                    return false;
                }
            }
            true
        });
        if let Some(n) = self.limit {
            result.items.truncate(n);
        }
        result
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("unknown feed: {0}")]
    UnknownFeed(String),
}

/// One aggregation key: its organic providers, optional sponsored provider and
/// static fallback.
pub struct Feed {
    name: String,
    rate_limit_key: String,
    providers: Vec<Arc<dyn SourceProvider>>,
    sponsored: Option<Arc<dyn SourceProvider>>,
    fallback: Vec<NormalizedItem>,
}

impl Feed {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            rate_limit_key: name.to_string(),
            providers: Vec::new(),
            sponsored: None,
            fallback: Vec::new(),
        }
    }

    pub fn with_rate_limit_key(mut self, key: &str) -> Self {
        self.rate_limit_key = key.to_string();
        self
    }

    pub fn with_provider(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_sponsored(mut self, provider: Arc<dyn SourceProvider>) -> Self {
        self.sponsored = Some(provider);
        self
    }

    pub fn with_fallback(mut self, items: Vec<NormalizedItem>) -> Self {
        self.fallback = items;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rate_limit_key(&self) -> &str {
        &self.rate_limit_key
    }

    pub fn source_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn sponsored_name(&self) -> Option<&str> {
        self.sponsored.as_ref().map(|p| p.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorSettings {
    pub cache_ttl_secs: u64,
    /// How long the last-known-good copy is kept for emergency serving.
    pub stale_ttl_secs: u64,
    pub cooldown_ms: u64,
    pub tie_epsilon: f64,
}

impl Default for AggregatorSettings {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            stale_ttl_secs: 86_400,
            cooldown_ms: 900_000,
            tie_epsilon: merge::DEFAULT_TIE_EPSILON,
        }
    }
}

/// Counts from one hygiene sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub fresh_removed: usize,
    pub stale_removed: usize,
    pub buckets_pruned: usize,
}

/// Long-lived service shared by every handler. Built once at startup.
pub struct Aggregator {
    feeds: Vec<Feed>,
    index: HashMap<String, usize>,
    cache: TtlCache<AggregationResult>,
    last_good: TtlCache<AggregationResult>,
    limiter: Arc<RateLimiter>,
    scorer: RelevanceEngine,
    weights: SourceWeights,
    settings: AggregatorSettings,
}

impl Aggregator {
    pub fn new(
        settings: AggregatorSettings,
        limiter: Arc<RateLimiter>,
        scorer: RelevanceEngine,
        weights: SourceWeights,
    ) -> Self {
        ensure_metrics_described();
        gauge!("aggregator_cache_ttl_secs").set(settings.cache_ttl_secs as f64);
        Self {
            feeds: Vec::new(),
            index: HashMap::new(),
            cache: TtlCache::new(),
            last_good: TtlCache::new(),
            limiter,
            scorer,
            weights,
            settings,
        }
    }

    /// Register a feed; a later feed with the same name replaces the earlier one.
    pub fn add_feed(&mut self, feed: Feed) {
        match self.index.get(&feed.name) {
            Some(&i) => self.feeds[i] = feed,
            None => {
                self.index.insert(feed.name.clone(), self.feeds.len());
                self.feeds.push(feed);
            }
        }
    }

    pub fn with_feed(mut self, feed: Feed) -> Self {
        self.add_feed(feed);
        self
    }

    pub fn feeds(&self) -> &[Feed] {
        &self.feeds
    }

    pub fn feed(&self, name: &str) -> Option<&Feed> {
        self.index.get(name).map(|&i| &self.feeds[i])
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn settings(&self) -> AggregatorSettings {
        self.settings
    }

    pub async fn aggregate(
        &self,
        feed: &str,
        query: &AggregateQuery,
    ) -> Result<AggregationResult, AggregateError> {
        self.aggregate_at(feed, query, Utc::now()).await
    }

    /// Run the state machine for `feed` with `now` as the pass clock.
    pub async fn aggregate_at(
        &self,
        feed_name: &str,
        query: &AggregateQuery,
        now: DateTime<Utc>,
    ) -> Result<AggregationResult, AggregateError> {
        let feed = self
            .feed(feed_name)
            .ok_or_else(|| AggregateError::UnknownFeed(feed_name.to_string()))?;

        // CHECK_CACHE: no network, no quota.
        if let Some(hit) = self.cache.get_at(&feed.name, now) {
            counter!("aggregator_cache_hits_total", "feed" => feed.name.clone()).increment(1);
            tracing::debug!(target: "cache", feed = %feed.name, "cache hit");
            return Ok(query.apply(hit.served_as(CacheStatus::Hit), now));
        }
        counter!("aggregator_cache_misses_total", "feed" => feed.name.clone()).increment(1);

        // CHECK_RATE_LIMIT
        let decision = self.limiter.check_limit_at(&feed.rate_limit_key, now);
        if !decision.allowed {
            counter!("aggregator_rate_limited_total", "feed" => feed.name.clone()).increment(1);
            tracing::info!(
                target: "aggregate",
                feed = %feed.name,
                key = %feed.rate_limit_key,
                reset_at = %decision.reset_at,
                cooling = decision.cooldown_until.is_some(),
                "rate limited; serving degraded result"
            );
            let out = self.degrade(feed, now, "rate limited");
            return Ok(query.apply(out, now));
        }

        // FETCH → SCORE_AND_MERGE, with a panic anywhere in the pass caught here.
        let pass = AssertUnwindSafe(self.run_pass(feed, now)).catch_unwind().await;
        let fresh = match pass {
            Ok(r) => r,
            Err(_) => {
                tracing::error!(target: "aggregate", feed = %feed.name, "aggregation pass panicked");
                let out = self.degrade(feed, now, "aggregation failed");
                return Ok(query.apply(out, now));
            }
        };

        // Nothing answered: keep the last good copy rather than caching emptiness.
        if !fresh.source_outcomes.is_empty() && fresh.succeeded_sources() == 0 {
            tracing::warn!(target: "aggregate", feed = %feed.name, "all sources failed");
            if let Some(stale) = self.last_good.get_at(&feed.name, now) {
                counter!("aggregator_fallback_total", "feed" => feed.name.clone(), "kind" => "stale")
                    .increment(1);
                let mut out = stale.served_as(CacheStatus::Stale).with_notice("all sources failed");
                out.source_outcomes = fresh.source_outcomes;
                out.sponsored_outcome = fresh.sponsored_outcome;
                return Ok(query.apply(out, now));
            }
            let out = if feed.fallback.is_empty() {
                let mut out = fresh.with_notice("all sources failed");
                out.degraded = true;
                out
            } else {
                let mut out = self.static_fallback(feed, now);
                out.source_outcomes = fresh.source_outcomes;
                out.sponsored_outcome = fresh.sponsored_outcome;
                out
            };
            return Ok(query.apply(out, now));
        }

        // WRITE_CACHE
        self.cache
            .set_at(&feed.name, fresh.clone(), self.settings.cache_ttl_secs, now);
        self.last_good
            .set_at(&feed.name, fresh.clone(), self.settings.stale_ttl_secs, now);
        gauge!("aggregator_cache_entries").set(self.cache.len() as f64);

        tracing::info!(
            target: "aggregate",
            feed = %feed.name,
            items = fresh.items.len(),
            sources = fresh.source_outcomes.len(),
            succeeded = fresh.succeeded_sources(),
            "aggregation pass cached"
        );
        Ok(query.apply(fresh, now))
    }

    async fn run_pass(&self, feed: &Feed, now: DateTime<Utc>) -> AggregationResult {
        let cooldown_ms = self.settings.cooldown_ms;
        let organic = run_once(&feed.providers, Arc::clone(&self.limiter), cooldown_ms);
        let sponsored = async {
            match &feed.sponsored {
                Some(p) => {
                    Some(run_single(Arc::clone(p), Arc::clone(&self.limiter), cooldown_ms).await)
                }
                None => None,
            }
        };
        let (orchestration, sponsored) = tokio::join!(organic, sponsored);

        let (ads, sponsored_outcome) = match sponsored {
            Some((items, outcome)) => (merge::active_sponsored(items, now), Some(outcome)),
            None => (Vec::new(), None),
        };

        let mut items = orchestration.items;
        let ctx = ScoreContext {
            weights: &self.weights,
        };
        self.scorer.annotate(&mut items, &ctx);
        let items = merge::merge(items, ads, self.settings.tie_epsilon);

        AggregationResult {
            feed: feed.name.clone(),
            items,
            source_outcomes: orchestration.outcomes,
            sponsored_outcome,
            served_from_cache: false,
            cache_status: CacheStatus::Miss,
            degraded: false,
            notice: None,
            generated_at: now,
        }
    }

    /// Last-known-good copy, else the feed's static fallback, else an explicitly
    /// empty result.
    fn degrade(&self, feed: &Feed, now: DateTime<Utc>, reason: &str) -> AggregationResult {
        if let Some(stale) = self.last_good.get_at(&feed.name, now) {
            counter!("aggregator_fallback_total", "feed" => feed.name.clone(), "kind" => "stale")
                .increment(1);
            return stale.served_as(CacheStatus::Stale).with_notice(reason);
        }
        if !feed.fallback.is_empty() {
            return self.static_fallback(feed, now).with_notice(reason);
        }
        counter!("aggregator_fallback_total", "feed" => feed.name.clone(), "kind" => "empty")
            .increment(1);
        AggregationResult::empty(&feed.name, now, reason)
    }

    fn static_fallback(&self, feed: &Feed, now: DateTime<Utc>) -> AggregationResult {
        counter!("aggregator_fallback_total", "feed" => feed.name.clone(), "kind" => "static")
            .increment(1);
        AggregationResult {
            items: feed.fallback.clone(),
            ..AggregationResult::empty(&feed.name, now, "static fallback")
        }
    }

    /// Memory hygiene for both caches and the limiter. Never needed for
    /// correctness.
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let report = SweepReport {
            fresh_removed: self.cache.cleanup_at(now),
            stale_removed: self.last_good.cleanup_at(now),
            buckets_pruned: self.limiter.prune_idle_at(now),
        };
        gauge!("aggregator_cache_entries").set(self.cache.len() as f64);
        report
    }
}
