// src/ingest/providers/sponsored.rs
//! Sponsored content: CMS-shaped records plus a placement directive and an
//! active flag / date window. Inactive records are dropped here; the date
//! window is checked at merge time against the pass clock.

use metrics::counter;
use serde_json::Value;

use super::cms::map_record;
use super::{fields, records, Record};
use crate::ingest::types::{FetchError, ItemKind, NormalizedItem, Placement, SourceConfig};

fn map_sponsored(rec: &Record<'_>, cfg: &SourceConfig) -> Option<NormalizedItem> {
    if !rec.bool(fields::ACTIVE).unwrap_or(true) {
        return None;
    }
    let mut item = map_record(rec, cfg)?;

    // Misconfigured placement degrades to the bottom of the list.
    let placement = match rec.str(fields::PLACEMENT) {
        Some(raw) => raw.parse::<Placement>().unwrap_or_else(|e| {
            tracing::debug!(target: "ingest", source = %cfg.name, error = %e, "unknown placement; using bottom");
            Placement::Bottom
        }),
        None => Placement::Bottom,
    };

    item.kind = ItemKind::Sponsored;
    item.placement = Some(placement);
    item.active_from = rec.timestamp(fields::START);
    item.active_until = rec.timestamp(fields::END);
    Some(item)
}

pub fn parse_payload(body: &str, cfg: &SourceConfig) -> Result<Vec<NormalizedItem>, FetchError> {
    let root: Value = serde_json::from_str(body)
        .map_err(|e| FetchError::Parse(format!("sponsored json: {e}")))?;
    let list = records(&root)
        .ok_or_else(|| FetchError::Parse("sponsored json: no item list".into()))?;

    let out: Vec<NormalizedItem> = list
        .iter()
        .filter_map(|v| v.as_object().map(Record::new))
        .filter_map(|r| map_sponsored(&r, cfg))
        .collect();
    counter!("aggregator_items_parsed_total", "source" => cfg.name.clone()).increment(out.len() as u64);
    Ok(out)
}
