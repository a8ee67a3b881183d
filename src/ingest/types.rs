// src/ingest/types.rs
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Organic items come from news/CMS/social sources; sponsored ones from the ad provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Organic,
    Sponsored,
}

/// Where a sponsored item goes in the merged list.
///
/// Wire format: `"top"`, `"bottom"` or `"position-N"` (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Placement {
    Top,
    Bottom,
    Position(usize),
}

impl FromStr for Placement {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let t = s.trim().to_ascii_lowercase();
        match t.as_str() {
            "top" => Ok(Placement::Top),
            "bottom" => Ok(Placement::Bottom),
            other => other
                .strip_prefix("position-")
                .and_then(|n| n.trim().parse::<usize>().ok())
                .map(Placement::Position)
                .ok_or_else(|| format!("unknown placement directive: {s}")),
        }
    }
}

impl TryFrom<String> for Placement {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Placement> for String {
    fn from(p: Placement) -> Self {
        p.to_string()
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Placement::Top => write!(f, "top"),
            Placement::Bottom => write!(f, "bottom"),
            Placement::Position(n) => write!(f, "position-{n}"),
        }
    }
}

/// Provider-agnostic item every upstream payload is mapped into.
///
/// Upstream-sourced fields are never rewritten after parsing; scoring only
/// fills `relevance_score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedItem {
    pub id: String,
    pub title: String,
    pub summary: String,
    pub source_name: String,
    pub category: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub is_breaking: bool,
    #[serde(rename = "languageTag", alias = "language")]
    pub language: String,
    #[serde(default)]
    pub relevance_score: f64,
    #[serde(default)]
    pub kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<Placement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_until: Option<DateTime<Utc>>,
}

impl NormalizedItem {
    /// Minimal organic item; parsers fill the rest field by field.
    pub fn organic(source_name: &str, title: &str) -> Self {
        Self {
            id: String::new(),
            title: title.to_string(),
            summary: String::new(),
            source_name: source_name.to_string(),
            category: String::new(),
            published_at: DateTime::<Utc>::UNIX_EPOCH,
            url: String::new(),
            image_url: None,
            is_breaking: false,
            language: String::new(),
            relevance_score: 0.0,
            kind: ItemKind::Organic,
            placement: None,
            active_from: None,
            active_until: None,
        }
    }

    /// Sponsored item with a placement directive.
    pub fn sponsored(source_name: &str, title: &str, placement: Placement) -> Self {
        Self {
            kind: ItemKind::Sponsored,
            placement: Some(placement),
            ..Self::organic(source_name, title)
        }
    }

    pub fn is_sponsored(&self) -> bool {
        self.kind == ItemKind::Sponsored
    }

    /// Sponsored items run only inside their active window (bounds inclusive).
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        let started = self.active_from.map_or(true, |from| from <= now);
        let not_ended = self.active_until.map_or(true, |until| now <= until);
        started && not_ended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Success,
    Error,
    Timeout,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "success",
            SourceStatus::Error => "error",
            SourceStatus::Timeout => "timeout",
        }
    }
}

/// Per-provider result of one orchestration pass. Never carried across passes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceOutcome {
    pub source_name: String,
    pub status: SourceStatus,
    pub item_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Rss,
    Cms,
    Sponsored,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_priority() -> f64 {
    1.0
}

/// One upstream provider: where it lives, how long to wait, how much it weighs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub url: String,
    pub kind: SourceKind,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_priority")]
    pub priority: f64,
    #[serde(default)]
    pub rate_limit_key: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
}

impl SourceConfig {
    pub fn new(name: &str, url: &str, kind: SourceKind) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            kind,
            timeout_ms: default_timeout_ms(),
            priority: default_priority(),
            rate_limit_key: None,
            category: None,
            language: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Cooldown bucket; defaults to the source name.
    pub fn limit_key(&self) -> &str {
        self.rate_limit_key.as_deref().unwrap_or(&self.name)
    }
}

/// Upstream failures, recovered at the fetch boundary and surfaced as outcomes.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream returned HTTP {status}")]
    Http { status: u16 },
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to read body: {0}")]
    Body(String),
    #[error("malformed payload: {0}")]
    Parse(String),
    #[error("source cooling down until {0}")]
    CoolingDown(DateTime<Utc>),
}

impl FetchError {
    /// 429 means the upstream wants us to back off.
    pub fn is_throttled(&self) -> bool {
        matches!(self, FetchError::Http { status: 429 })
    }

    pub fn status(&self) -> SourceStatus {
        match self {
            FetchError::Timeout(_) => SourceStatus::Timeout,
            _ => SourceStatus::Error,
        }
    }
}

#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    async fn fetch_latest(&self) -> Result<Vec<NormalizedItem>, FetchError>;
    fn name(&self) -> &str;

    /// Hard ceiling for one fetch.
    fn timeout(&self) -> Duration {
        Duration::from_secs(10)
    }

    /// Bucket that receives cooldowns when this source throttles us.
    fn rate_limit_key(&self) -> &str {
        self.name()
    }
}
