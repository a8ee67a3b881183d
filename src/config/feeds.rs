// src/config/feeds.rs
//! `[[feeds]]` entries: which sources make up one aggregation key.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::sync::Arc;

use crate::aggregate::Feed;
use crate::ingest::fetcher::HttpSource;
use crate::ingest::stable_id;
use crate::ingest::types::{NormalizedItem, SourceConfig, SourceKind};

/// Static item served when a feed has neither fresh nor stale data.
#[derive(Debug, Clone, Deserialize)]
pub struct FallbackItem {
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub language: String,
}

impl FallbackItem {
    pub fn to_item(&self, feed: &str) -> NormalizedItem {
        let mut it = NormalizedItem::organic("fallback", self.title.trim());
        it.id = stable_id(feed, &self.url, &self.title);
        it.url = self.url.clone();
        it.summary = self.summary.clone();
        it.category = self.category.clone();
        it.language = self.language.clone();
        it
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub name: String,
    /// Limiter bucket for the whole feed; defaults to the feed name.
    #[serde(default)]
    pub rate_limit_key: Option<String>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    #[serde(default)]
    pub sponsored: Option<SourceConfig>,
    #[serde(default)]
    pub fallback: Vec<FallbackItem>,
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            bail!("feed with empty name");
        }
        for src in self.sources.iter().chain(self.sponsored.iter()) {
            if src.name.trim().is_empty() {
                bail!("feed `{}`: source with empty name", self.name);
            }
            if src.url.trim().is_empty() {
                bail!("feed `{}`: source `{}` has no url", self.name, src.name);
            }
            if src.timeout_ms == 0 {
                bail!("feed `{}`: source `{}` has zero timeout", self.name, src.name);
            }
        }
        if let Some(sp) = &self.sponsored {
            if sp.kind != SourceKind::Sponsored {
                bail!("feed `{}`: sponsored source `{}` must have kind = \"sponsored\"", self.name, sp.name);
            }
        }
        if let Some(src) = self.sources.iter().find(|s| s.kind == SourceKind::Sponsored) {
            bail!("feed `{}`: `{}` belongs under [feeds.sponsored]", self.name, src.name);
        }
        Ok(())
    }

    pub fn build(&self, client: &reqwest::Client) -> Feed {
        let name = self.name.trim();
        let mut feed = Feed::new(name)
            .with_rate_limit_key(self.rate_limit_key.as_deref().unwrap_or(name))
            .with_fallback(self.fallback.iter().map(|f| f.to_item(name)).collect());
        for src in &self.sources {
            feed = feed.with_provider(Arc::new(HttpSource::new(src.clone(), client.clone())));
        }
        if let Some(sp) = &self.sponsored {
            feed = feed.with_sponsored(Arc::new(HttpSource::new(sp.clone(), client.clone())));
        }
        feed
    }
}
