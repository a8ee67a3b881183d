//! # Rate Limiter / Cooldown Guard
//!
//! Fixed-window request counting per logical bucket, plus an explicit
//! "cooldown until T" state entered when an upstream answers 429.
//!
//! - On each check, an elapsed window resets the counter and starts a new one.
//! - An active cooldown denies unconditionally, even right after a window reset.
//! - Otherwise the counter is incremented; allowed while `count <= max_requests`.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use serde::Serialize;

const MAX_SPAN_MS: u64 = 10 * 365 * 24 * 3600 * 1_000;

fn span(ms: u64) -> Duration {
    Duration::milliseconds(ms.min(MAX_SPAN_MS) as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 30,
        }
    }
}

/// Outcome of one gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    window_count: u32,
    window_reset_at: DateTime<Utc>,
    cooldown_until: Option<DateTime<Utc>>,
}

/// Read-only view of a bucket for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSnapshot {
    pub window_count: u32,
    pub window_reset_at: DateTime<Utc>,
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, BucketState>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> RateLimitConfig {
        self.config
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BucketState>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn window(&self) -> Duration {
        span(self.config.window_ms)
    }

    pub fn check_limit(&self, key: &str) -> RateLimitDecision {
        self.check_limit_at(key, Utc::now())
    }

    /// Atomic read-modify-write of one bucket as of `now`.
    pub fn check_limit_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitDecision {
        let window = self.window();
        let max = self.config.max_requests;
        let mut map = self.lock();
        let state = map.entry(key.to_string()).or_insert(BucketState {
            window_count: 0,
            window_reset_at: now + window,
            cooldown_until: None,
        });

        if now >= state.window_reset_at {
            state.window_count = 0;
            state.window_reset_at = now + window;
        }

        if let Some(until) = state.cooldown_until {
            if now < until {
                return RateLimitDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at: until.max(state.window_reset_at),
                    cooldown_until: Some(until),
                };
            }
            state.cooldown_until = None;
        }

        state.window_count = state.window_count.saturating_add(1);
        let allowed = state.window_count <= max;
        RateLimitDecision {
            allowed,
            remaining: max.saturating_sub(state.window_count),
            reset_at: state.window_reset_at,
            cooldown_until: None,
        }
    }

    pub fn enter_cooldown(&self, key: &str, duration_ms: u64) -> DateTime<Utc> {
        self.enter_cooldown_at(key, duration_ms, Utc::now())
    }

    /// Out-of-band back-off signal from the fetch layer. Independent of the
    /// window counter; a later, longer cooldown extends an earlier one.
    pub fn enter_cooldown_at(&self, key: &str, duration_ms: u64, now: DateTime<Utc>) -> DateTime<Utc> {
        let until = now + span(duration_ms);
        let window = self.window();
        let mut map = self.lock();
        let state = map.entry(key.to_string()).or_insert(BucketState {
            window_count: 0,
            window_reset_at: now + window,
            cooldown_until: None,
        });
        let until = state.cooldown_until.map_or(until, |prev| prev.max(until));
        state.cooldown_until = Some(until);
        drop(map);

        counter!("aggregator_cooldown_activations_total", "key" => key.to_string()).increment(1);
        tracing::warn!(target: "rate_limit", key, %until, "cooldown entered");
        until
    }

    /// Active cooldown deadline for `key`, if any. Does not count as a request.
    pub fn cooldown_until_at(&self, key: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.lock()
            .get(key)
            .and_then(|s| s.cooldown_until)
            .filter(|until| now < *until)
    }

    pub fn snapshot(&self, key: &str) -> Option<BucketSnapshot> {
        self.lock().get(key).map(|s| BucketSnapshot {
            window_count: s.window_count,
            window_reset_at: s.window_reset_at,
            cooldown_until: s.cooldown_until,
        })
    }

    /// Forget buckets whose window and cooldown have both lapsed.
    pub fn prune_idle_at(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, s| now < s.window_reset_at || s.cooldown_until.is_some_and(|u| now < u));
        before - map.len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
