// src/relevance.rs
//! Relevance scorer: source priority, breaking-news heuristics and location
//! tiers, compiled once from config and applied as a pure function.
//!
//! score = priority(source) * PRIORITY_POINTS
//!       + breaking_bonus            (upstream flag or keyword hit, once)
//!       + Σ tier.bonus              (each matching tier once)

use regex::Regex;
use serde::Deserialize;

use crate::ingest::types::NormalizedItem;
use crate::source_weights::SourceWeights;

/// Points per unit of source priority.
pub const PRIORITY_POINTS: f64 = 10.0;
pub const DEFAULT_BREAKING_BONUS: f64 = 25.0;

/* ----------------------------
Config schema (from TOML)
---------------------------- */

#[derive(Debug, Clone, Deserialize)]
pub struct RelevanceConfig {
    #[serde(default = "default_breaking_bonus")]
    pub breaking_bonus: f64,
    #[serde(default)]
    pub breaking_keywords: Vec<String>,
    #[serde(default, rename = "location_tiers")]
    pub tiers: Vec<LocationTier>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationTier {
    pub name: String,
    pub bonus: f64,
    pub keywords: Vec<String>,
}

fn default_breaking_bonus() -> f64 {
    DEFAULT_BREAKING_BONUS
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self::default_seed()
    }
}

impl RelevanceConfig {
    /// Built-in seed for the Phuket portal: English and Thai breaking markers,
    /// district > island > country tiers.
    pub fn default_seed() -> Self {
        let strings = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            breaking_bonus: DEFAULT_BREAKING_BONUS,
            breaking_keywords: strings(&[
                "breaking",
                "urgent",
                "just in",
                "developing",
                "alert",
                "ด่วน",
                "ข่าวด่วน",
                "ด่วนที่สุด",
                "เตือนภัย",
            ]),
            tiers: vec![
                LocationTier {
                    name: "district".into(),
                    bonus: 15.0,
                    keywords: strings(&[
                        "patong", "kata", "karon", "kamala", "rawai", "chalong", "kathu",
                        "thalang", "old town", "ป่าตอง", "กะตะ", "กะรน", "ราไวย์", "ฉลอง",
                        "กะทู้", "ถลาง",
                    ]),
                },
                LocationTier {
                    name: "city".into(),
                    bonus: 8.0,
                    keywords: strings(&["phuket", "ภูเก็ต"]),
                },
                LocationTier {
                    name: "country".into(),
                    bonus: 3.0,
                    keywords: strings(&["thailand", "thai", "ไทย", "ประเทศไทย"]),
                },
            ],
        }
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }
}

/// Result of scoring one item, with the terms that contributed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Relevance {
    pub score: f64,
    pub reasons: Vec<String>,
}

/// Per-pass inputs the scorer does not own.
#[derive(Debug, Clone, Copy)]
pub struct ScoreContext<'a> {
    pub weights: &'a SourceWeights,
}

/* ----------------------------
Compiled engine
---------------------------- */

#[derive(Debug)]
struct CompiledTier {
    name: String,
    bonus: f64,
    re: Regex,
}

#[derive(Debug)]
pub struct RelevanceEngine {
    breaking_bonus: f64,
    breaking: Option<Regex>,
    tiers: Vec<CompiledTier>,
}

/// One case-insensitive alternation per keyword list. ASCII keywords get word
/// boundaries; Thai is written without spaces, so those match as substrings.
fn keyword_regex(keywords: &[String]) -> anyhow::Result<Option<Regex>> {
    let alts: Vec<String> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .map(|k| {
            let esc = regex::escape(k);
            if k.is_ascii() {
                format!(r"\b{esc}\b")
            } else {
                esc
            }
        })
        .collect();
    if alts.is_empty() {
        return Ok(None);
    }
    let re = Regex::new(&format!("(?i)(?:{})", alts.join("|")))
        .map_err(|e| anyhow::anyhow!("keyword regex error: {e}"))?;
    Ok(Some(re))
}

impl RelevanceEngine {
    pub fn new(cfg: &RelevanceConfig) -> anyhow::Result<Self> {
        let breaking = keyword_regex(&cfg.breaking_keywords)?;
        let tiers = cfg
            .tiers
            .iter()
            .filter_map(|t| match keyword_regex(&t.keywords) {
                Ok(Some(re)) => Some(Ok(CompiledTier {
                    name: t.name.clone(),
                    bonus: t.bonus,
                    re,
                })),
                Ok(None) => None,
                Err(e) => Some(Err(anyhow::anyhow!("tier `{}`: {e}", t.name))),
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self {
            breaking_bonus: cfg.breaking_bonus,
            breaking,
            tiers,
        })
    }

    pub fn from_toml_str(toml_str: &str) -> anyhow::Result<Self> {
        Self::new(&RelevanceConfig::from_toml_str(toml_str)?)
    }

    /// Score plus the reasons behind it. Pure: no I/O, no mutation.
    pub fn explain(&self, item: &NormalizedItem, ctx: &ScoreContext<'_>) -> Relevance {
        let text = format!("{} {}", item.title, item.summary);
        let mut rel = Relevance::default();

        let priority = ctx.weights.weight_for(&item.source_name);
        rel.score += priority * PRIORITY_POINTS;
        rel.reasons.push(format!("source:{priority:.2}"));

        let keyword_hit = self.breaking.as_ref().is_some_and(|re| re.is_match(&text));
        if item.is_breaking || keyword_hit {
            rel.score += self.breaking_bonus;
            rel.reasons.push(
                if item.is_breaking { "breaking:flag" } else { "breaking:keyword" }.to_string(),
            );
        }

        for tier in &self.tiers {
            if tier.re.is_match(&text) {
                rel.score += tier.bonus;
                rel.reasons.push(format!("location:{}", tier.name));
            }
        }

        rel
    }

    pub fn score(&self, item: &NormalizedItem, ctx: &ScoreContext<'_>) -> f64 {
        self.explain(item, ctx).score
    }

    /// Fill `relevance_score` on every item. Nothing else is touched.
    pub fn annotate(&self, items: &mut [NormalizedItem], ctx: &ScoreContext<'_>) {
        for item in items.iter_mut() {
            let rel = self.explain(item, ctx);
            tracing::trace!(target: "relevance", id = %item.id, score = rel.score, reasons = ?rel.reasons, "scored");
            item.relevance_score = rel.score;
        }
    }
}

impl Default for RelevanceEngine {
    fn default() -> Self {
        Self {
            breaking_bonus: DEFAULT_BREAKING_BONUS,
            breaking: None,
            tiers: Vec::new(),
        }
    }
}

/* ----------------------------
Tests
---------------------------- */
