// src/merge.rs
//! Content merger: rank organic items, insert sponsored items by their
//! placement directive, then drop repeated stories by normalized title.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::ingest::title_key;
use crate::ingest::types::{NormalizedItem, Placement};

pub const DEFAULT_TIE_EPSILON: f64 = 0.5;

fn tier_then_score(a: &NormalizedItem, b: &NormalizedItem) -> Ordering {
    b.is_breaking
        .cmp(&a.is_breaking)
        .then_with(|| b.relevance_score.total_cmp(&a.relevance_score))
}

/// Breaking first, then score, then newest first. Score only decides when the
/// gap to the neighbouring item exceeds `tie_epsilon`: runs of items whose
/// consecutive gaps are within it are near-ties and are ordered by recency.
/// Stable: fully equal items keep their input order.
pub fn rank(items: &mut [NormalizedItem], tie_epsilon: f64) {
    let eps = if tie_epsilon.is_nan() || tie_epsilon < 0.0 {
        0.0
    } else {
        tie_epsilon
    };
    items.sort_by(tier_then_score);

    let mut start = 0;
    while start < items.len() {
        let mut end = start + 1;
        while end < items.len()
            && items[end].is_breaking == items[start].is_breaking
            && items[end - 1].relevance_score - items[end].relevance_score <= eps
        {
            end += 1;
        }
        items[start..end].sort_by(|a, b| b.published_at.cmp(&a.published_at));
        start = end;
    }
}

/// Insert sponsored items one at a time, each against the list as it stands.
/// `position-N` lands at index N-1 when that index exists, otherwise at the end.
pub fn place_sponsored(
    mut list: Vec<NormalizedItem>,
    sponsored: Vec<NormalizedItem>,
) -> Vec<NormalizedItem> {
    for s in sponsored {
        match s.placement.unwrap_or(Placement::Bottom) {
            Placement::Top => list.insert(0, s),
            Placement::Bottom => list.push(s),
            Placement::Position(n) => match n.checked_sub(1) {
                Some(idx) if idx <= list.len() => list.insert(idx, s),
                _ => {
                    tracing::debug!(target: "aggregate", id = %s.id, position = n, "placement out of range; appending");
                    list.push(s)
                }
            },
        }
    }
    list
}

/// Keep the first item per normalized title. Untitled items are keyed by id.
pub fn dedup_by_title(items: Vec<NormalizedItem>) -> Vec<NormalizedItem> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .into_iter()
        .filter(|it| {
            let key = title_key(&it.title);
            let key = if key.is_empty() {
                format!("id:{}", it.id)
            } else {
                key
            };
            seen.insert(key)
        })
        .collect()
}

/// Sponsored items whose active window contains `now`.
pub fn active_sponsored(items: Vec<NormalizedItem>, now: DateTime<Utc>) -> Vec<NormalizedItem> {
    items.into_iter().filter(|it| it.is_active_at(now)).collect()
}

pub fn merge(
    mut organic: Vec<NormalizedItem>,
    sponsored: Vec<NormalizedItem>,
    tie_epsilon: f64,
) -> Vec<NormalizedItem> {
    rank(&mut organic, tie_epsilon);
    dedup_by_title(place_sponsored(organic, sponsored))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_750_000_000 + secs, 0).unwrap()
    }

    fn org(title: &str, score: f64, at: i64) -> NormalizedItem {
        let mut it = NormalizedItem::organic("rss", title);
        it.id = title.to_lowercase();
        it.relevance_score = score;
        it.published_at = t(at);
        it
    }

    fn ad(title: &str, p: Placement) -> NormalizedItem {
        let mut it = NormalizedItem::sponsored("ads", title, p);
        it.id = format!("ad-{title}");
        it
    }

    fn titles(items: &[NormalizedItem]) -> Vec<&str> {
        items.iter().map(|i| i.title.as_str()).collect()
    }

    fn abc() -> Vec<NormalizedItem> {
        vec![org("A", 3.0, 0), org("B", 2.0, 0), org("C", 1.0, 0)]
    }

    #[test]
    fn placement_directives() {
        let cases = [
            (Placement::Position(2), vec!["A", "S", "B", "C"]),
            (Placement::Top, vec!["S", "A", "B", "C"]),
            (Placement::Bottom, vec!["A", "B", "C", "S"]),
            (Placement::Position(99), vec!["A", "B", "C", "S"]),
        ];
        for (p, want) in cases {
            let out = place_sponsored(abc(), vec![ad("S", p)]);
            assert_eq!(titles(&out), want, "placement {p}");
        }
    }

    #[test]
    fn later_positions_see_earlier_insertions() {
        let out = place_sponsored(
            abc(),
            vec![ad("S1", Placement::Top), ad("S2", Placement::Position(2))],
        );
        assert_eq!(titles(&out), vec!["S1", "S2", "A", "B", "C"]);
    }

    #[test]
    fn empty_organic_still_honors_placement() {
        let out = merge(
            Vec::new(),
            vec![
                ad("Low", Placement::Bottom),
                ad("Mid", Placement::Position(5)),
                ad("High", Placement::Top),
            ],
            DEFAULT_TIE_EPSILON,
        );
        assert_eq!(titles(&out), vec!["High", "Low", "Mid"]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let mut dup = org("  storm WARNING  issued ", 0.0, 5);
        dup.id = "second".into();
        let out = dedup_by_title(vec![org("Storm warning issued", 1.0, 0), dup]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "storm warning issued");
    }

    #[test]
    fn breaking_first_then_score() {
        let mut brk = org("Breaking", 1.0, 0);
        brk.is_breaking = true;
        let mut items = vec![org("High", 50.0, 0), brk];
        rank(&mut items, DEFAULT_TIE_EPSILON);
        assert_eq!(titles(&items), vec!["Breaking", "High"]);
    }

    #[test]
    fn equal_scores_order_by_recency() {
        let mut items = vec![org("Older", 10.0, 0), org("Newer", 10.0, 60)];
        rank(&mut items, DEFAULT_TIE_EPSILON);
        assert_eq!(titles(&items), vec!["Newer", "Older"]);
    }

    #[test]
    fn near_ties_fall_through_to_recency() {
        let mut items = vec![org("Slightly higher", 10.2, 0), org("Newer", 10.0, 60)];
        rank(&mut items, 0.5);
        assert_eq!(titles(&items), vec!["Newer", "Slightly higher"]);

        let mut items = vec![org("Clearly higher", 11.0, 0), org("Newer", 10.0, 60)];
        rank(&mut items, 0.5);
        assert_eq!(titles(&items), vec!["Clearly higher", "Newer"]);
    }

    #[test]
    fn close_scores_across_a_round_number_are_still_near_ties() {
        let mut items = vec![org("Older", 10.51, 0), org("Newer", 10.49, 60)];
        rank(&mut items, 0.5);
        assert_eq!(titles(&items), vec!["Newer", "Older"]);
    }

    #[test]
    fn near_tie_runs_never_cross_the_breaking_tier() {
        let mut brk = org("Breaking old", 10.0, 0);
        brk.is_breaking = true;
        let mut items = vec![org("Plain new", 10.1, 60), brk];
        rank(&mut items, 0.5);
        assert_eq!(titles(&items), vec!["Breaking old", "Plain new"]);
    }

    #[test]
    fn full_ties_keep_input_order() {
        let mut items = vec![org("First", 1.0, 0), org("Second", 1.0, 0), org("Third", 1.0, 0)];
        rank(&mut items, DEFAULT_TIE_EPSILON);
        assert_eq!(titles(&items), vec!["First", "Second", "Third"]);
    }

    #[test]
    fn order_is_independent_of_arrival_order() {
        let a = vec![org("X", 5.0, 1), org("Y", 7.0, 2), org("Z", 5.0, 3)];
        let mut b = a.clone();
        b.reverse();
        let ma = merge(a, Vec::new(), DEFAULT_TIE_EPSILON);
        let mb = merge(b, Vec::new(), DEFAULT_TIE_EPSILON);
        assert_eq!(titles(&ma), titles(&mb));
    }

    #[test]
    fn inactive_sponsored_are_dropped() {
        let now = t(0);
        let mut expired = ad("Expired", Placement::Top);
        expired.active_until = Some(now - Duration::seconds(1));
        let mut future = ad("Future", Placement::Top);
        future.active_from = Some(now + Duration::hours(1));
        let live = ad("Live", Placement::Top);
        let out = active_sponsored(vec![expired, future, live], now);
        assert_eq!(titles(&out), vec!["Live"]);
    }
}
