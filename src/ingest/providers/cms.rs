// src/ingest/providers/cms.rs
//! Headless-CMS JSON mapping. Field names vary between content types and
//! CMS versions; the lookup chains live in `providers::fields`.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde_json::Value;

use super::{fields, records, Record, SUMMARY_MAX_CHARS, TITLE_MAX_CHARS};
use crate::ingest::types::{FetchError, NormalizedItem, SourceConfig};
use crate::ingest::{normalize_text, stable_id};

/// Map one CMS record. `None` when the record has no usable title.
pub(crate) fn map_record(rec: &Record<'_>, cfg: &SourceConfig) -> Option<NormalizedItem> {
    let title = normalize_text(&rec.str(fields::TITLE)?, TITLE_MAX_CHARS);
    if title.is_empty() {
        return None;
    }
    let summary = rec
        .str(fields::SUMMARY)
        .map(|s| normalize_text(&s, SUMMARY_MAX_CHARS))
        .unwrap_or_default();
    let url = rec.str(fields::URL).unwrap_or_default();

    let mut item = NormalizedItem::organic(&cfg.name, &title);
    item.id = rec
        .str(fields::ID)
        .unwrap_or_else(|| stable_id(&cfg.name, &url, &title));
    item.summary = summary;
    item.url = url;
    item.category = rec
        .str(fields::CATEGORY)
        .or_else(|| cfg.category.clone())
        .unwrap_or_default();
    item.published_at = rec
        .timestamp(fields::PUBLISHED)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    item.is_breaking = rec.bool(fields::BREAKING).unwrap_or(false);
    item.image_url = rec.str(fields::IMAGE);
    item.language = rec
        .str(fields::LANGUAGE)
        .or_else(|| cfg.language.clone())
        .unwrap_or_default();
    Some(item)
}

/// Parse a CMS response. Malformed records are skipped one by one; only a
/// body that is not JSON, or has no recognizable list, fails the fetch.
pub fn parse_payload(body: &str, cfg: &SourceConfig) -> Result<Vec<NormalizedItem>, FetchError> {
    let root: Value =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(format!("cms json: {e}")))?;
    let list = records(&root).ok_or_else(|| FetchError::Parse("cms json: no item list".into()))?;

    let mut out = Vec::with_capacity(list.len());
    let mut skipped = 0usize;
    for v in list {
        match v.as_object().map(Record::new).and_then(|r| map_record(&r, cfg)) {
            Some(item) => out.push(item),
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        tracing::debug!(target: "ingest", source = %cfg.name, skipped, "cms records without usable title");
    }
    counter!("aggregator_items_parsed_total", "source" => cfg.name.clone()).increment(out.len() as u64);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::SourceKind;

    fn cfg() -> SourceConfig {
        let mut c = SourceConfig::new("cms", "https://cms.test/api/news", SourceKind::Cms);
        c.category = Some("News".into());
        c.language = Some("th".into());
        c
    }

    #[test]
    fn maps_pascal_case_fields() {
        let body = r#"[{
            "Id": "n-1",
            "Title": "Kata viewpoint reopens",
            "Summary": "<p>After repairs</p>",
            "Category": "Travel",
            "PublishedTimestamp": 1749519000,
            "IsBreaking": true,
            "Url": "https://cms.test/n-1",
            "ImageUrl": "https://cms.test/n-1.jpg",
            "Language": "en"
        }]"#;
        let items = parse_payload(body, &cfg()).unwrap();
        assert_eq!(items.len(), 1);
        let it = &items[0];
        assert_eq!(it.id, "n-1");
        assert_eq!(it.summary, "After repairs");
        assert_eq!(it.category, "Travel");
        assert_eq!(it.published_at.timestamp(), 1_749_519_000);
        assert!(it.is_breaking);
        assert_eq!(it.image_url.as_deref(), Some("https://cms.test/n-1.jpg"));
        assert_eq!(it.language, "en");
        assert_eq!(it.source_name, "cms");
    }

    #[test]
    fn falls_back_through_chains_and_source_defaults() {
        let body = r#"{"data": [{
            "id": 12,
            "attributes": {
                "headline": "Night market moves",
                "excerpt": "New location",
                "publishedAt": "2025-06-10T01:30:00Z",
                "image": {"url": "/uploads/m.jpg"}
            }
        }]}"#;
        let it = &parse_payload(body, &cfg()).unwrap()[0];
        assert_eq!(it.id, "12");
        assert_eq!(it.title, "Night market moves");
        assert_eq!(it.summary, "New location");
        assert_eq!(it.category, "News");
        assert_eq!(it.language, "th");
        assert!(!it.is_breaking);
        assert_eq!(it.image_url.as_deref(), Some("/uploads/m.jpg"));
        assert_eq!(it.published_at.timestamp(), 1_749_519_000);
    }

    #[test]
    fn one_bad_record_keeps_the_rest() {
        let body = r#"{"items": [
            {"Title": "Good one"},
            "not an object",
            {"Summary": "no title"},
            {"Title": "Bad date", "PublishedTimestamp": "soon"}
        ]}"#;
        let items = parse_payload(body, &cfg()).unwrap();
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Good one", "Bad date"]);
        assert_eq!(items[1].published_at, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn non_json_body_is_a_parse_error() {
        assert!(matches!(
            parse_payload("<html>oops</html>", &cfg()),
            Err(FetchError::Parse(_))
        ));
        assert!(matches!(
            parse_payload(r#"{"error": "down"}"#, &cfg()),
            Err(FetchError::Parse(_))
        ));
    }
}
