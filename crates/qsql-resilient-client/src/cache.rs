//! Bounded LRU-with-TTL in-memory fallback cache, spec §4.2.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Entry {
    value: String,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) > self.ttl
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    map: HashMap<String, Entry>,
    /// Most-recently-used order, back = most recent.
    order: Vec<String>,
    counters: CacheCounters,
}

/// Bounded LRU cache with per-entry TTL. Backs the resilient wrappers'
/// fallback path (spec §4.2): `get`/`set`/`delete`/`exists`, eviction when
/// size exceeds `max_size`. Never returns an entry past its TTL (spec §4.2
/// invariant "fallback never returns stale data past TTL").
pub struct FallbackCache {
    max_size: usize,
    default_ttl: Duration,
    inner: Mutex<Inner>,
}

impl FallbackCache {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self {
            max_size,
            default_ttl,
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                order: Vec::new(),
                counters: CacheCounters::default(),
            }),
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired = match inner.map.get(key) {
            Some(e) => e.is_expired(now),
            None => {
                inner.counters.misses += 1;
                return None;
            }
        };
        if expired {
            inner.map.remove(key);
            inner.order.retain(|k| k != key);
            inner.counters.misses += 1;
            return None;
        }
        inner.counters.hits += 1;
        touch(&mut inner.order, key);
        inner.map.get(key).map(|e| e.value.clone())
    }

    pub async fn set(&self, key: &str, value: impl Into<String>) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    pub async fn set_with_ttl(&self, key: &str, value: impl Into<String>, ttl: Duration) {
        let mut inner = self.inner.lock().await;
        inner.map.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                inserted_at: Instant::now(),
                ttl,
            },
        );
        touch(&mut inner.order, key);
        while inner.order.len() > self.max_size {
            let evict = inner.order.remove(0);
            inner.map.remove(&evict);
            inner.counters.evictions += 1;
        }
    }

    pub async fn delete(&self, key: &str) {
        let mut inner = self.inner.lock().await;
        inner.map.remove(key);
        inner.order.retain(|k| k != key);
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn counters(&self) -> CacheCounters {
        self.inner.lock().await.counters
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.map.len()
    }
}

fn touch(order: &mut Vec<String>, key: &str) {
    order.retain(|k| k != key);
    order.push(key.to_string());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache = FallbackCache::new(10, Duration::from_secs(60));
        cache.set("k1", "v1").await;
        assert_eq!(cache.get("k1").await, Some("v1".to_string()));
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let cache = FallbackCache::new(10, Duration::from_millis(10));
        cache.set("k1", "v1").await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("k1").await, None);
    }

    #[tokio::test]
    async fn evicts_lru_when_over_capacity() {
        let cache = FallbackCache::new(2, Duration::from_secs(60));
        cache.set("a", "1").await;
        cache.set("b", "2").await;
        cache.set("c", "3").await; // evicts "a"
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("b").await, Some("2".to_string()));
        assert_eq!(cache.get("c").await, Some("3".to_string()));
        assert_eq!(cache.counters().await.evictions, 1);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let cache = FallbackCache::new(10, Duration::from_secs(60));
        cache.set("k1", "v1").await;
        cache.delete("k1").await;
        assert!(!cache.exists("k1").await);
    }

    #[tokio::test]
    async fn recently_read_entries_survive_eviction() {
        let cache = FallbackCache::new(2, Duration::from_secs(60));
        cache.set("a", "1").await;
        cache.set("b", "2").await;
        let _ = cache.get("a").await; // touch a, making b the LRU
        cache.set("c", "3").await; // should evict b
        assert_eq!(cache.get("a").await, Some("1".to_string()));
        assert_eq!(cache.get("b").await, None);
    }
}
