// src/ingest/providers/mod.rs
//! Per-provider parsers. Each maps one upstream payload shape into
//! `NormalizedItem`s and tolerates missing or malformed fields.

pub mod cms;
pub mod rss;
pub mod sponsored;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use time::format_description::well_known::{Rfc2822, Rfc3339};
use time::OffsetDateTime;

pub(crate) const TITLE_MAX_CHARS: usize = 300;
pub(crate) const SUMMARY_MAX_CHARS: usize = 1500;

fn from_offset(dt: OffsetDateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond())
}

/// Unix seconds or milliseconds; values past 1e12 are taken as milliseconds.
pub(crate) fn from_unix_number(n: i64) -> Option<DateTime<Utc>> {
    if n.abs() >= 1_000_000_000_000 {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

/// Parse RFC 2822 (RSS), RFC 3339 (Atom, most CMSes) or bare unix digits.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return from_offset(dt);
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc3339) {
        return from_offset(dt);
    }
    if let Ok(n) = s.parse::<i64>() {
        return from_unix_number(n);
    }
    None
}

/// Field lookup order for CMS-style JSON objects. The first key present with a
/// usable value wins.
pub mod fields {
    pub const ID: &[&str] = &["Id", "id", "documentId", "slug"];
    pub const TITLE: &[&str] = &["Title", "title", "headline"];
    pub const SUMMARY: &[&str] = &["Summary", "summary", "description", "excerpt"];
    pub const CATEGORY: &[&str] = &["Category", "category", "section"];
    pub const PUBLISHED: &[&str] = &[
        "PublishedTimestamp",
        "publishedAt",
        "published_at",
        "date",
    ];
    pub const BREAKING: &[&str] = &["IsBreaking", "isBreaking", "breaking"];
    pub const URL: &[&str] = &["Url", "url", "link"];
    pub const IMAGE: &[&str] = &["ImageUrl", "imageUrl", "image"];
    pub const LANGUAGE: &[&str] = &["Language", "language", "locale", "lang"];
    pub const PLACEMENT: &[&str] = &["Placement", "placement", "position"];
    pub const ACTIVE: &[&str] = &["Active", "active", "isActive"];
    pub const START: &[&str] = &["StartDate", "startDate", "start"];
    pub const END: &[&str] = &["EndDate", "endDate", "end"];
}

/// Flattened view over a CMS record: `attributes` (Strapi-style) first, then
/// the record itself.
pub(crate) struct Record<'a> {
    layers: Vec<&'a Map<String, Value>>,
}

impl<'a> Record<'a> {
    pub(crate) fn new(obj: &'a Map<String, Value>) -> Self {
        let mut layers = Vec::with_capacity(2);
        if let Some(Value::Object(attrs)) = obj.get("attributes") {
            layers.push(attrs);
        }
        layers.push(obj);
        Self { layers }
    }

    fn lookup<'s>(&'s self, keys: &'s [&'s str]) -> impl Iterator<Item = &'a Value> + 's {
        keys.iter().flat_map(move |k| {
            self.layers
                .iter()
                .copied()
                .filter_map(move |l| l.get(*k))
        })
    }

    /// First non-empty string (numbers are stringified, e.g. numeric ids).
    pub(crate) fn str(&self, keys: &[&str]) -> Option<String> {
        self.lookup(keys).find_map(|v| match v {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            // Image fields are sometimes objects: {"url": "..."}
            Value::Object(o) => o
                .get("url")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.trim().to_string()),
            _ => None,
        })
    }

    pub(crate) fn bool(&self, keys: &[&str]) -> Option<bool> {
        self.lookup(keys).find_map(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => n.as_i64().map(|x| x != 0),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Some(true),
                "false" | "0" | "no" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    pub(crate) fn timestamp(&self, keys: &[&str]) -> Option<DateTime<Utc>> {
        self.lookup(keys).find_map(|v| match v {
            Value::String(s) => parse_timestamp(s),
            Value::Number(n) => n.as_i64().and_then(from_unix_number),
            _ => None,
        })
    }
}

/// Unwrap the common CMS envelopes: bare array, `{data: [...]}`, `{items: [...]}`.
pub(crate) fn records(root: &Value) -> Option<&Vec<Value>> {
    match root {
        Value::Array(v) => Some(v),
        Value::Object(o) => ["data", "items", "results"]
            .iter()
            .find_map(|k| o.get(*k).and_then(Value::as_array)),
        _ => None,
    }
}
