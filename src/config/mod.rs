// src/config/mod.rs
//! Service configuration: TOML file + env overrides.
//!
//! Resolution:
//! 1) $AGGREGATOR_CONFIG_PATH (must exist)
//! 2) config/aggregator.toml
//! 3) built-in defaults (no feeds)

pub mod feeds;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::aggregate::{Aggregator, AggregatorSettings};
use crate::ingest::fetcher::build_http_client;
use crate::merge::DEFAULT_TIE_EPSILON;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::relevance::{RelevanceConfig, RelevanceEngine};
use crate::source_weights::SourceWeights;

pub use feeds::{FallbackItem, FeedConfig};

pub const ENV_CONFIG_PATH: &str = "AGGREGATOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "config/aggregator.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_stale_ttl_secs")]
    pub stale_ttl_secs: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    300
}
fn default_stale_ttl_secs() -> u64 {
    86_400
}
fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            stale_ttl_secs: default_stale_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSection {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Back-off applied to a source after it answers 429.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_window_ms() -> u64 {
    60_000
}
fn default_max_requests() -> u32 {
    30
}
fn default_cooldown_ms() -> u64 {
    900_000
}

impl Default for RateLimitSection {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
            max_requests: default_max_requests(),
            cooldown_ms: default_cooldown_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeSection {
    /// Score differences inside this band are treated as ties (recency decides).
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
}

fn default_tie_epsilon() -> f64 {
    DEFAULT_TIE_EPSILON
}

impl Default for MergeSection {
    fn default() -> Self {
        Self {
            tie_epsilon: default_tie_epsilon(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub cache: CacheSection,
    #[serde(default)]
    pub rate_limit: RateLimitSection,
    #[serde(default)]
    pub merge: MergeSection,
    #[serde(default)]
    pub relevance: RelevanceConfig,
    /// Alternative source names → configured source name, for priority lookup.
    #[serde(default)]
    pub source_aliases: HashMap<String, String>,
    #[serde(default)]
    pub feeds: Vec<FeedConfig>,
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: AppConfig = toml::from_str(s).context("parsing aggregator config")?;
        Ok(cfg)
    }

    /// Load, apply env overrides, validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading aggregator config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)
            .with_context(|| format!("in {}", path.display()))?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            return Self::load_from(&pb);
        }
        let default = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default.exists() {
            return Self::load_from(&default);
        }
        tracing::warn!(target: "aggregate", "no config file found; using built-in defaults");
        let mut cfg = Self::default();
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|k| std::env::var(k).ok());
    }

    /// Overrides from any key lookup. Unparseable values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(lookup: &dyn Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            let raw = lookup(key)?;
            match raw.trim().parse::<T>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(target: "aggregate", key, value = %raw, "ignoring invalid env override");
                    None
                }
            }
        }
        let l: &dyn Fn(&str) -> Option<String> = &lookup;

        if let Some(v) = parsed(l, "AGGREGATOR_CACHE_TTL_SECS") {
            self.cache.ttl_secs = v;
        }
        if let Some(v) = parsed(l, "AGGREGATOR_STALE_TTL_SECS") {
            self.cache.stale_ttl_secs = v;
        }
        if let Some(v) = parsed(l, "AGGREGATOR_SWEEP_INTERVAL_SECS") {
            self.cache.sweep_interval_secs = v;
        }
        if let Some(v) = parsed(l, "AGGREGATOR_RATE_WINDOW_MS") {
            self.rate_limit.window_ms = v;
        }
        if let Some(v) = parsed(l, "AGGREGATOR_RATE_MAX_REQUESTS") {
            self.rate_limit.max_requests = v;
        }
        if let Some(v) = parsed(l, "AGGREGATOR_COOLDOWN_MS") {
            self.rate_limit.cooldown_ms = v;
        }
        if let Some(v) = parsed::<f64>(l, "AGGREGATOR_TIE_EPSILON") {
            if v.is_finite() && v >= 0.0 {
                self.merge.tie_epsilon = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.rate_limit.window_ms == 0 {
            bail!("rate_limit.window_ms must be > 0");
        }
        if self.cache.sweep_interval_secs == 0 {
            bail!("cache.sweep_interval_secs must be > 0");
        }
        if !self.merge.tie_epsilon.is_finite() || self.merge.tie_epsilon < 0.0 {
            bail!("merge.tie_epsilon must be a non-negative number");
        }
        let mut names = HashSet::new();
        for feed in &self.feeds {
            feed.validate()?;
            if !names.insert(feed.name.trim()) {
                bail!("duplicate feed name `{}`", feed.name);
            }
        }
        Ok(())
    }

    pub fn settings(&self) -> AggregatorSettings {
        AggregatorSettings {
            cache_ttl_secs: self.cache.ttl_secs,
            stale_ttl_secs: self.cache.stale_ttl_secs.max(self.cache.ttl_secs),
            cooldown_ms: self.rate_limit.cooldown_ms,
            tie_epsilon: self.merge.tie_epsilon,
        }
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            window_ms: self.rate_limit.window_ms,
            max_requests: self.rate_limit.max_requests,
        }
    }

    /// Source priorities across every feed, organic and sponsored.
    pub fn source_weights(&self) -> SourceWeights {
        let all = self
            .feeds
            .iter()
            .flat_map(|f| f.sources.iter().chain(f.sponsored.iter()));
        SourceWeights::from_sources(all, &self.source_aliases)
    }

    /// Wire the service: one HTTP client, one limiter, HTTP providers per feed.
    pub fn build_aggregator(&self) -> Result<Aggregator> {
        let client = build_http_client().context("building HTTP client")?;
        let scorer = RelevanceEngine::new(&self.relevance).context("compiling relevance config")?;
        let limiter = Arc::new(RateLimiter::new(self.rate_limit_config()));

        let mut agg = Aggregator::new(self.settings(), limiter, scorer, self.source_weights());
        for feed in &self.feeds {
            agg.add_feed(feed.build(&client));
        }
        tracing::info!(
            target: "aggregate",
            feeds = self.feeds.len(),
            ttl_secs = self.cache.ttl_secs,
            window_ms = self.rate_limit.window_ms,
            max_requests = self.rate_limit.max_requests,
            "aggregator configured"
        );
        Ok(agg)
    }
}
