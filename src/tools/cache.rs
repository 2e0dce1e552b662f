//! Tool Response Cache
//!
//! Successful provider responses are cached by request fingerprint so that a
//! repeated query inside the TTL window never reaches the provider again.
//!
//! # Semantics
//!
//! - Only successes are stored; failures are never cached.
//! - A hit returns the exact payload stored, byte for byte once serialized.
//! - Expired entries count as misses and are dropped on access.
//! - Capacity is bounded; the least recently used entry is evicted first.
//! - `max_entries = 0` or `ttl_secs = 0` disables the cache.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use utoipa::ToSchema;

use crate::utils::toml_config::CacheConfig;

/// Statistics for cache performance monitoring
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: usize,
    /// Entries dropped because the cache was full
    pub evictions: u64,
}

impl CacheStats {
    /// Hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    payload: Value,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-memory TTL + LRU cache keyed by request fingerprint.
pub struct ToolCache {
    entries: Option<Mutex<LruCache<String, CacheEntry>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ToolCache {
    pub fn new(config: &CacheConfig) -> Self {
        let entries = match NonZeroUsize::new(config.max_entries) {
            Some(capacity) if config.ttl_secs > 0 => Some(Mutex::new(LruCache::new(capacity))),
            _ => None,
        };
        Self {
            entries,
            ttl: Duration::from_secs(config.ttl_secs),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn disabled() -> Self {
        Self::new(&CacheConfig {
            ttl_secs: 0,
            max_entries: 0,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let Some(entries) = &self.entries else {
            return None;
        };

        let mut entries = entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.payload.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn insert(&self, key: String, payload: Value) {
        let Some(entries) = &self.entries else {
            return;
        };

        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + self.ttl,
        };
        // `push` also returns the previous value when the key was present;
        // only a different key means something was evicted.
        if let Some((evicted, _)) = entries.lock().push(key.clone(), entry) {
            if evicted != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        if let Some(entries) = &self.entries {
            entries.lock().pop(key);
        }
    }

    pub fn clear(&self) {
        if let Some(entries) = &self.entries {
            entries.lock().clear();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map(|e| e.lock().len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cache(ttl_secs: u64, max_entries: usize) -> ToolCache {
        ToolCache::new(&CacheConfig {
            ttl_secs,
            max_entries,
        })
    }

    #[test]
    fn test_hit_and_miss() {
        let cache = cache(60, 8);
        assert!(cache.get("k").is_none());

        cache.insert("k".into(), json!({"results": [1, 2, 3]}));
        assert_eq!(cache.get("k"), Some(json!({"results": [1, 2, 3]})));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entry_count, 1);
        assert!((stats.hit_rate() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_lru_eviction() {
        let cache = cache(60, 2);
        cache.insert("a".into(), json!(1));
        cache.insert("b".into(), json!(2));
        // touch "a" so "b" becomes least recently used
        assert!(cache.get("a").is_some());
        cache.insert("c".into(), json!(3));

        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_is_not_eviction() {
        let cache = cache(60, 2);
        cache.insert("a".into(), json!(1));
        cache.insert("a".into(), json!(2));
        assert_eq!(cache.get("a"), Some(json!(2)));
        assert_eq!(cache.stats().evictions, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_is_a_miss() {
        let cache = cache(5, 8);
        cache.insert("k".into(), json!("v"));
        tokio::time::advance(Duration::from_secs(6)).await;

        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled_cache() {
        let cache = ToolCache::disabled();
        assert!(!cache.is_enabled());
        cache.insert("k".into(), json!(1));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }
}
