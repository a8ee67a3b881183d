//! # Source Weights
//!
//! Base priority per upstream source, the first term of every relevance score.
//!
//! - Built from the configured sources (`priority` field) plus optional aliases.
//! - Case-insensitive lookup with normalization of punctuation, dashes, etc.
//! - Fallback order: aliases → exact match → substring match → default.
//!
//! Item `source_name` values come from provider configs, so exact matches are
//! the common path; aliases cover renamed feeds whose cached items still carry
//! the old name.

use serde::Deserialize;
use std::collections::HashMap;

use crate::ingest::types::SourceConfig;

/// Upper bound on one source's base priority.
pub const MAX_PRIORITY: f64 = 10.0;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceWeights {
    /// Priority for sources that match nothing.
    #[serde(default = "default_priority")]
    pub default_weight: f64,
    #[serde(default)]
    pub weights: HashMap<String, f64>,
    /// Alternative name → canonical source name.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_priority() -> f64 {
    1.0
}

impl Default for SourceWeights {
    fn default() -> Self {
        Self {
            default_weight: default_priority(),
            weights: HashMap::new(),
            aliases: HashMap::new(),
        }
    }
}

impl SourceWeights {
    /// Weights from configured sources; a name listed twice keeps the higher priority.
    pub fn from_sources<'a, I>(sources: I, aliases: &HashMap<String, String>) -> Self
    where
        I: IntoIterator<Item = &'a SourceConfig>,
    {
        let mut weights: HashMap<String, f64> = HashMap::new();
        for src in sources {
            let w = clamp_priority(src.priority);
            weights
                .entry(normalize(&src.name))
                .and_modify(|cur| *cur = cur.max(w))
                .or_insert(w);
        }
        let aliases = aliases
            .iter()
            .map(|(a, c)| (normalize(a), normalize(c)))
            .collect();
        Self {
            weights,
            aliases,
            ..Self::default()
        }
    }

    /// Base priority for `source`.
    pub fn weight_for(&self, source: &str) -> f64 {
        let s = normalize(source);

        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.weights.get(canon) {
                return clamp_priority(w);
            }
        }

        if let Some(&w) = self.weights.get(&s) {
            return clamp_priority(w);
        }

        // Longest key first so "phuket news th" beats "phuket news"; equal
        // lengths go to the alphabetically first key, independent of map order.
        let best = self
            .weights
            .iter()
            .filter(|(k, _)| !k.is_empty() && s.contains(k.as_str()))
            .max_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| b.0.cmp(a.0)));
        if let Some((_, &w)) = best {
            return clamp_priority(w);
        }

        clamp_priority(self.default_weight)
    }
}

/// Lowercase, turn separators into spaces, collapse runs of spaces.
fn normalize(s: &str) -> String {
    let mut out = s.trim().to_lowercase();

    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '’', '\''], " ");

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn clamp_priority(x: f64) -> f64 {
    if x.is_finite() {
        x.clamp(0.0, MAX_PRIORITY)
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;

    fn src(name: &str, priority: f64) -> SourceConfig {
        let mut s = SourceConfig::new(name, "https://x.test", SourceKind::Rss);
        s.priority = priority;
        s
    }

    fn weights() -> SourceWeights {
        let sources = [
            src("Phuket News", 1.5),
            src("phuket-news-th", 2.0),
            src("The Thaiger", 1.2),
            src("city-cms", 3.0),
        ];
        let aliases = HashMap::from([("pn-legacy".to_string(), "Phuket News".to_string())]);
        SourceWeights::from_sources(&sources, &aliases)
    }

    #[test]
    fn exact_match_is_case_and_dash_insensitive() {
        let w = weights();
        assert!((w.weight_for("PHUKET_NEWS") - 1.5).abs() < 1e-9);
        assert!((w.weight_for("City CMS") - 3.0).abs() < 1e-9);
    }

    #[test]
    fn alias_resolves_to_canonical() {
        let w = weights();
        assert!((w.weight_for("PN-Legacy") - 1.5).abs() < 1e-9);
    }

    #[test]
    fn substring_prefers_longest_key() {
        let w = weights();
        assert!((w.weight_for("Phuket News TH (mirror)") - 2.0).abs() < 1e-9);
    }

    #[test]
    fn equal_length_substrings_resolve_the_same_way_every_time() {
        for _ in 0..200 {
            let w = SourceWeights::from_sources(&[src("abc", 2.0), src("xyz", 5.0)], &HashMap::new());
            assert!((w.weight_for("abc xyz mirror") - 2.0).abs() < 1e-9);
            assert!((w.weight_for("xyz abc mirror") - 2.0).abs() < 1e-9);
        }
    }

    #[test]
    fn unknown_source_gets_default() {
        let w = weights();
        assert!((w.weight_for("somewhere else") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn priorities_are_clamped() {
        let w = SourceWeights::from_sources(
            &[src("loud", 99.0), src("broken", f64::NAN), src("neg", -2.0)],
            &HashMap::new(),
        );
        assert_eq!(w.weight_for("loud"), MAX_PRIORITY);
        assert_eq!(w.weight_for("broken"), 0.0);
        assert_eq!(w.weight_for("neg"), 0.0);
    }
}
