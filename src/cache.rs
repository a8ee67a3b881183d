//! # TTL Cache
//! Generic key → value store with per-entry absolute expiry.
//!
//! An entry is visible only while `now < stored_at + ttl`. Reads purge
//! expired entries as a side effect; `cleanup` sweeps the rest and exists
//! for memory hygiene only. No LRU: keys are a small, enumerable set of
//! aggregation endpoints.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};

/// Upper bound on a single TTL so expiry arithmetic cannot overflow.
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    stored_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn expires_at(&self) -> DateTime<Utc> {
        self.stored_at + self.ttl
    }

    fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at()
    }
}

/// Thread-safe TTL cache. Every operation locks once, so per-key updates are
/// atomic and concurrent writers to one key resolve as last-writer-wins.
#[derive(Debug)]
pub struct TtlCache<V> {
    inner: Mutex<HashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set(&self, key: &str, value: V, ttl_secs: u64) {
        self.set_at(key, value, ttl_secs, Utc::now());
    }

    /// Store (or overwrite) `key` as of `now`.
    pub fn set_at(&self, key: &str, value: V, ttl_secs: u64, now: DateTime<Utc>) {
        let ttl = Duration::seconds(ttl_secs.min(MAX_TTL_SECS) as i64);
        self.lock().insert(
            key.to_string(),
            CacheEntry {
                value,
                stored_at: now,
                ttl,
            },
        );
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_at(key, Utc::now())
    }

    /// Returns the value only if still fresh at `now`; purges it otherwise.
    pub fn get_at(&self, key: &str, now: DateTime<Utc>) -> Option<V> {
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if entry.is_fresh_at(now) => Some(entry.value.clone()),
            Some(_) => {
                map.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn has(&self, key: &str) -> bool {
        self.has_at(key, Utc::now())
    }

    /// Same freshness rule as `get_at`, without cloning the payload.
    pub fn has_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        let mut map = self.lock();
        match map.get(key) {
            Some(entry) if entry.is_fresh_at(now) => true,
            Some(_) => {
                map.remove(key);
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Utc::now())
    }

    /// Drop every entry expired at `now`. Returns how many were removed.
    pub fn cleanup_at(&self, now: DateTime<Utc>) -> usize {
        let mut map = self.lock();
        let before = map.len();
        map.retain(|_, e| e.is_fresh_at(now));
        before - map.len()
    }

    /// Physically stored entries, expired ones included until swept.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn value_visible_strictly_before_expiry() {
        let c = TtlCache::new();
        c.set_at("news", 7u32, 300, t0());

        assert_eq!(c.get_at("news", t0()), Some(7));
        assert_eq!(c.get_at("news", t0() + Duration::seconds(299)), Some(7));
        assert!(c.has_at("news", t0() + Duration::milliseconds(299_999)));
        assert_eq!(c.get_at("news", t0() + Duration::seconds(300)), None);
    }

    #[test]
    fn expired_read_purges_entry() {
        let c = TtlCache::new();
        c.set_at("a", "x".to_string(), 1, t0());
        assert_eq!(c.len(), 1);
        assert!(!c.has_at("a", t0() + Duration::seconds(5)));
        assert_eq!(c.len(), 0);
    }

    #[test]
    fn set_overwrites_and_restarts_ttl() {
        let c = TtlCache::new();
        c.set_at("k", 1, 10, t0());
        c.set_at("k", 2, 10, t0() + Duration::seconds(8));
        assert_eq!(c.get_at("k", t0() + Duration::seconds(15)), Some(2));
    }

    #[test]
    fn zero_ttl_is_never_visible() {
        let c = TtlCache::new();
        c.set_at("k", 1, 0, t0());
        assert_eq!(c.get_at("k", t0()), None);
    }

    #[test]
    fn cleanup_sweeps_only_expired() {
        let c = TtlCache::new();
        c.set_at("short", 1, 10, t0());
        c.set_at("long", 2, 1_000, t0());
        let removed = c.cleanup_at(t0() + Duration::seconds(60));
        assert_eq!(removed, 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_at("long", t0() + Duration::seconds(60)), Some(2));
    }

    #[test]
    fn delete_reports_presence() {
        let c = TtlCache::new();
        c.set("k", 1, 60);
        assert!(c.delete("k"));
        assert!(!c.delete("k"));
        assert!(c.is_empty());
    }
}
