//! Small bounded LRU cache for prompt -> decision pairs (§4.3 step 1, §9).
//!
//! The source system wrapped its decision method in a cache decorator with no
//! visible eviction policy; we replace that with an explicit, size-bounded
//! `lru::LruCache` and a TTL check at read time so staleness can never be
//! silently served.

use crate::domain::types::AIDecision;
use chrono::{DateTime, Utc};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;

struct Entry {
    decision: AIDecision,
    cached_at: DateTime<Utc>,
}

pub struct DecisionCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: chrono::Duration,
}

impl DecisionCache {
    pub fn new(capacity: usize, ttl: chrono::Duration) -> Self {
        Self {
            inner: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).expect("capacity is at least 1"),
            )),
            ttl,
        }
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<AIDecision> {
        let mut guard = self.inner.lock().expect("decision cache mutex poisoned");
        match guard.get(key) {
            Some(entry) if now.signed_duration_since(entry.cached_at) <= self.ttl => {
                Some(entry.decision.clone())
            }
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, decision: AIDecision, now: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("decision cache mutex poisoned");
        guard.put(
            key,
            Entry {
                decision,
                cached_at: now,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Source;

    fn sample(symbol: &str, now: DateTime<Utc>) -> AIDecision {
        AIDecision::fallback_hold(symbol.to_string(), now, Source::Llm)
    }

    #[test]
    fn hits_within_ttl_and_misses_after() {
        let now = Utc::now();
        let cache = DecisionCache::new(4, chrono::Duration::seconds(30));
        cache.put("k".to_string(), sample("rb2501", now), now);
        assert!(cache.get("k", now + chrono::Duration::seconds(10)).is_some());
        assert!(cache.get("k", now + chrono::Duration::seconds(31)).is_none());
    }

    #[test]
    fn evicts_least_recently_used_beyond_capacity() {
        let now = Utc::now();
        let cache = DecisionCache::new(1, chrono::Duration::seconds(30));
        cache.put("a".to_string(), sample("rb2501", now), now);
        cache.put("b".to_string(), sample("hc2501", now), now);
        assert!(cache.get("a", now).is_none());
        assert!(cache.get("b", now).is_some());
    }
}
