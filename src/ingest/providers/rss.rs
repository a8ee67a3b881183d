// src/ingest/providers/rss.rs
//! Tolerant RSS 2.0 / Atom extraction on top of `quick_xml::Reader`.
//!
//! Each `<item>`/`<entry>` is collected on its own. Fields are read
//! independently, so a missing one falls back to a default; only an item with
//! neither title nor description is dropped. When the markup breaks mid-item,
//! that item is abandoned and reading resumes at the next item start.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;

use super::{parse_timestamp, SUMMARY_MAX_CHARS, TITLE_MAX_CHARS};
use crate::ingest::types::{FetchError, NormalizedItem, SourceConfig};
use crate::ingest::{normalize_text, stable_id};

/// Images embedded as HTML inside a CDATA description are not XML events.
static RE_IMG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<img\b[^>]*\bsrc\s*=\s*["']([^"']+)["']"#).unwrap()
});

/// Element names (lowercased) whose text is kept for an item.
const ITEM_FIELDS: &[&str] = &[
    "title",
    "link",
    "description",
    "summary",
    "content:encoded",
    "content",
    "pubdate",
    "dc:date",
    "published",
    "updated",
    "category",
    "dc:subject",
    "guid",
    "id",
];

const TITLE: &[&str] = &["title"];
const LINK: &[&str] = &["link", "link@href"];
const DESCRIPTION: &[&str] = &["description", "summary", "content:encoded", "content"];
const PUBLISHED: &[&str] = &["pubdate", "dc:date", "published", "updated"];
const CATEGORY: &[&str] = &["category", "dc:subject", "category@term"];
const GUID: &[&str] = &["guid", "id"];
const IMAGE: &[&str] = &["enclosure@url", "media@url", "img@src"];

fn lower_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn attr_value(e: &BytesStart, key: &str) -> Option<String> {
    e.attributes()
        .with_checks(false)
        .flatten()
        .find(|a| a.key.as_ref().eq_ignore_ascii_case(key.as_bytes()))
        .map(|a| String::from_utf8_lossy(&a.value).into_owned())
}

/// Raw field text of one item, in document order. Entities stay encoded until
/// `normalize_text`/`clean_url` run, so unknown HTML entities never fail a read.
#[derive(Default)]
struct Draft {
    fields: Vec<(String, String)>,
    open: Option<(String, String)>,
}

impl Draft {
    fn start(&mut self, name: &str, e: &BytesStart) {
        self.note_attrs(name, e);
        if self.open.is_none() && ITEM_FIELDS.contains(&name) {
            self.open = Some((name.to_string(), String::new()));
        }
    }

    fn note_attrs(&mut self, name: &str, e: &BytesStart) {
        let (key, slot) = match name {
            "link" => {
                let rel = attr_value(e, "rel");
                if rel.is_some_and(|r| !r.eq_ignore_ascii_case("alternate")) {
                    return;
                }
                ("href", "link@href")
            }
            "category" => ("term", "category@term"),
            "enclosure" => ("url", "enclosure@url"),
            "media:content" | "media:thumbnail" => ("url", "media@url"),
            "img" => ("src", "img@src"),
            _ => return,
        };
        if let Some(v) = attr_value(e, key) {
            self.fields.push((slot.to_string(), v));
        }
    }

    fn push_text(&mut self, raw: &[u8]) {
        if let Some((_, buf)) = self.open.as_mut() {
            if !buf.is_empty() {
                buf.push(' ');
            }
            buf.push_str(&String::from_utf8_lossy(raw));
        }
    }

    fn end(&mut self, name: &str) {
        if self.open.as_ref().is_some_and(|(n, _)| n == name) {
            self.close_field();
        }
    }

    fn close_field(&mut self) {
        if let Some(f) = self.open.take() {
            self.fields.push(f);
        }
    }

    /// Text of the first listed field that is present and non-empty.
    fn first(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|want| {
            self.fields
                .iter()
                .find(|(n, v)| n == want && !v.trim().is_empty())
                .map(|(_, v)| v.as_str())
        })
    }
}

/// Byte offset of the next `<item` / `<entry` tag at or after `from`.
fn next_item_start(body: &str, from: usize) -> Option<usize> {
    let bytes = body.as_bytes();
    let from = from.min(bytes.len());
    let hay = &bytes[from..];
    ["<item", "<entry"]
        .iter()
        .filter_map(|tag| {
            let tag = tag.as_bytes();
            hay.windows(tag.len() + 1).position(|w| {
                w[..tag.len()].eq_ignore_ascii_case(tag)
                    && matches!(w[tag.len()], b'>' | b'/' | b' ' | b'\t' | b'\r' | b'\n')
            })
        })
        .min()
        .map(|i| from + i)
}

struct Collected {
    drafts: Vec<Draft>,
    root_seen: bool,
    abandoned: usize,
}

fn collect_items(body: &str) -> Collected {
    let mut out = Collected {
        drafts: Vec::new(),
        root_seen: false,
        abandoned: 0,
    };
    let mut offset = 0usize;

    'restart: loop {
        let mut reader = Reader::from_str(&body[offset..]);
        {
            let cfg = reader.config_mut();
            cfg.trim_text(true);
            cfg.check_end_names = false;
            cfg.allow_unmatched_ends = true;
        }
        let mut current: Option<Draft> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let name = lower_name(e.name().as_ref());
                    match name.as_str() {
                        "item" | "entry" => current = Some(Draft::default()),
                        "rss" | "feed" | "channel" | "rdf:rdf" => out.root_seen = true,
                        _ => {
                            if let Some(d) = current.as_mut() {
                                d.start(&name, &e);
                            }
                        }
                    }
                }
                Ok(Event::Empty(e)) => {
                    if let Some(d) = current.as_mut() {
                        d.note_attrs(&lower_name(e.name().as_ref()), &e);
                    }
                }
                Ok(Event::Text(t)) => {
                    if let Some(d) = current.as_mut() {
                        d.push_text(&t);
                    }
                }
                Ok(Event::CData(t)) => {
                    if let Some(d) = current.as_mut() {
                        d.push_text(&t);
                    }
                }
                Ok(Event::End(e)) => {
                    let name = lower_name(e.name().as_ref());
                    match name.as_str() {
                        "item" | "entry" => {
                            if let Some(mut d) = current.take() {
                                d.close_field();
                                out.drafts.push(d);
                            }
                        }
                        _ => {
                            if let Some(d) = current.as_mut() {
                                d.end(&name);
                            }
                        }
                    }
                }
                Ok(Event::Eof) => break 'restart,
                Ok(_) => {}
                Err(err) => {
                    let at = offset + reader.buffer_position() as usize;
                    if current.take().is_some() {
                        out.abandoned += 1;
                    }
                    tracing::debug!(target: "ingest", error = %err, at, "broken feed markup");
                    match next_item_start(body, at.max(offset + 1)) {
                        Some(next) => {
                            offset = next;
                            continue 'restart;
                        }
                        None => break 'restart,
                    }
                }
            }
        }
    }
    out
}

fn clean_url(raw: &str) -> String {
    html_escape::decode_html_entities(raw.trim()).to_string()
}

/// Image: enclosure, then media:content / media:thumbnail, then the first
/// `<img>` in the body (either as markup events or inside CDATA).
fn extract_image(d: &Draft, raw_description: Option<&str>) -> Option<String> {
    d.first(IMAGE)
        .map(clean_url)
        .or_else(|| {
            let desc = html_escape::decode_html_entities(raw_description?).to_string();
            RE_IMG
                .captures(&desc)
                .and_then(|c| c.get(1))
                .map(|m| clean_url(m.as_str()))
        })
        .filter(|s| !s.is_empty())
}

fn build_item(d: &Draft, cfg: &SourceConfig) -> Option<NormalizedItem> {
    let raw_desc = d.first(DESCRIPTION);
    let summary = raw_desc
        .map(|s| normalize_text(s, SUMMARY_MAX_CHARS))
        .unwrap_or_default();
    let mut title = d
        .first(TITLE)
        .map(|t| normalize_text(t, TITLE_MAX_CHARS))
        .unwrap_or_default();

    if title.is_empty() {
        if summary.is_empty() {
            return None;
        }
        title = summary.chars().take(120).collect();
    }

    let url = d.first(LINK).map(clean_url).unwrap_or_default();

    let category = d
        .first(CATEGORY)
        .map(|c| normalize_text(c, 80))
        .filter(|c| !c.is_empty())
        .or_else(|| cfg.category.clone())
        .unwrap_or_default();

    let published_at = d
        .first(PUBLISHED)
        .and_then(parse_timestamp)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let id = d
        .first(GUID)
        .map(|g| g.trim().to_string())
        .unwrap_or_else(|| stable_id(&cfg.name, &url, &title));

    let mut item = NormalizedItem::organic(&cfg.name, &title);
    item.id = id;
    item.summary = summary;
    item.url = url;
    item.category = category;
    item.published_at = published_at;
    item.image_url = extract_image(d, raw_desc);
    item.language = cfg.language.clone().unwrap_or_default();
    Some(item)
}

/// Parse an RSS/Atom document. Fails only when the body is not a feed at all.
pub fn parse_feed(body: &str, cfg: &SourceConfig) -> Result<Vec<NormalizedItem>, FetchError> {
    let t0 = std::time::Instant::now();

    let collected = collect_items(body);
    if collected.drafts.is_empty() && !collected.root_seen {
        return Err(FetchError::Parse("no rss/atom root element".to_string()));
    }

    let mut out = Vec::with_capacity(collected.drafts.len());
    let mut dropped = collected.abandoned;
    for d in &collected.drafts {
        match build_item(d, cfg) {
            Some(item) => out.push(item),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        tracing::debug!(target: "ingest", source = %cfg.name, dropped, "rss items skipped");
    }

    let ms = t0.elapsed().as_secs_f64() * 1_000.0;
    histogram!("aggregator_parse_ms", "source" => cfg.name.clone()).record(ms);
    counter!("aggregator_items_parsed_total", "source" => cfg.name.clone()).increment(out.len() as u64);
    Ok(out)
}
