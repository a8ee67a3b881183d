// src/ingest/mod.rs
pub mod fetcher;
pub mod providers;
pub mod types;

use std::sync::Arc;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::ingest::fetcher::fetch_source;
use crate::ingest::types::{NormalizedItem, SourceOutcome, SourceProvider, SourceStatus};
use crate::rate_limit::RateLimiter;

/// Outcome for a fetch task that panicked or was cancelled.
fn task_failed(name: &str, e: &tokio::task::JoinError) -> SourceOutcome {
    tracing::error!(target: "ingest", source = name, error = %e, "fetch task failed");
    counter!(
        "aggregator_source_outcomes_total",
        "source" => name.to_string(),
        "status" => SourceStatus::Error.as_str()
    )
    .increment(1);
    SourceOutcome {
        source_name: name.to_string(),
        status: SourceStatus::Error,
        item_count: 0,
        error_detail: Some(format!("fetch task failed: {e}")),
        fetched_at: chrono::Utc::now(),
        elapsed_ms: 0,
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_histogram!("aggregator_fetch_ms", "Per-source fetch latency in milliseconds.");
        describe_histogram!("aggregator_parse_ms", "RSS parse time per payload in milliseconds.");
        describe_counter!("aggregator_items_parsed_total", "Items produced by provider parsers.");
        describe_counter!(
            "aggregator_source_outcomes_total",
            "Source fetch outcomes by source and status."
        );
        describe_counter!(
            "aggregator_cooldown_activations_total",
            "Cooldowns entered after upstream throttling."
        );
        describe_counter!("aggregator_cache_hits_total", "Aggregations served from fresh cache.");
        describe_counter!("aggregator_cache_misses_total", "Aggregations that missed the cache.");
        describe_counter!(
            "aggregator_rate_limited_total",
            "Aggregations denied by the local rate limiter."
        );
        describe_counter!(
            "aggregator_fallback_total",
            "Aggregations answered from stale cache or static fallback."
        );
        describe_gauge!("aggregator_cache_entries", "Entries physically held by the result cache.");
        describe_gauge!("aggregator_cache_ttl_secs", "Configured result cache TTL.");
    });
}

/// Normalize upstream text: decode entities, strip tags, straighten quotes,
/// collapse whitespace, cap length at `max_chars`.
pub fn normalize_text(s: &str, max_chars: usize) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }

    out
}

/// Dedup key: trimmed, whitespace-collapsed, lowercased title.
pub fn title_key(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Stable id for items whose upstream omits one: short SHA-256 of source, url and title.
pub fn stable_id(source: &str, url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"|");
    hasher.update(url.as_bytes());
    hasher.update(b"|");
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(16);
    for b in digest.iter().take(8) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Items from every successful source plus one outcome per source.
#[derive(Debug, Clone, Default)]
pub struct Orchestration {
    pub items: Vec<NormalizedItem>,
    pub outcomes: Vec<SourceOutcome>,
}

impl Orchestration {
    pub fn succeeded(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status == SourceStatus::Success)
            .count()
    }
}

/// Fan out to every provider at once and wait for all of them to settle.
///
/// Each provider runs in its own task under its own timeout. A failing,
/// hanging or panicking source contributes zero items and an outcome entry;
/// it never aborts siblings. Items and outcomes come back in provider order,
/// whatever order the fetches completed in.
pub async fn run_once(
    providers: &[Arc<dyn SourceProvider>],
    guard: Arc<RateLimiter>,
    cooldown_ms: u64,
) -> Orchestration {
    ensure_metrics_described();

    let handles: Vec<_> = providers
        .iter()
        .map(|p| {
            let p = Arc::clone(p);
            let guard = Arc::clone(&guard);
            tokio::spawn(async move { fetch_source(p.as_ref(), &guard, cooldown_ms).await })
        })
        .collect();

    let joined = futures::future::join_all(handles).await;

    let mut out = Orchestration::default();
    for (provider, res) in providers.iter().zip(joined) {
        match res {
            Ok((mut items, outcome)) => {
                out.items.append(&mut items);
                out.outcomes.push(outcome);
            }
            Err(e) => out.outcomes.push(task_failed(provider.name(), &e)),
        }
    }

    tracing::info!(
        target: "ingest",
        sources = out.outcomes.len(),
        succeeded = out.succeeded(),
        items = out.items.len(),
        "orchestration pass finished"
    );
    out
}

/// Fetch a single provider in its own task, so a panic there stays that
/// source's error outcome.
pub async fn run_single(
    provider: Arc<dyn SourceProvider>,
    guard: Arc<RateLimiter>,
    cooldown_ms: u64,
) -> (Vec<NormalizedItem>, SourceOutcome) {
    ensure_metrics_described();
    let p = Arc::clone(&provider);
    let handle = tokio::spawn(async move { fetch_source(p.as_ref(), &guard, cooldown_ms).await });
    match handle.await {
        Ok(res) => res,
        Err(e) => (Vec::new(), task_failed(provider.name(), &e)),
    }
}
