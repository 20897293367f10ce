//! The standalone-deployment default for `RemoteKv` (C2).
//!
//! `RemoteKv`'s concrete backend is a "Redis-shaped dependency" left out of
//! scope by spec §4.2 — this workspace never wires a real Redis client.
//! `LocalKv` wraps the same bounded LRU-with-TTL `FallbackCache` the
//! resilient wrappers already fall back to, so a single-process daemon has
//! a working schema/quota/result-cache backend with no external dependency.
//! A clustered deployment swaps in a real Redis-backed `RemoteKv`
//! implementation at this same seam; `Runtime<K, C>` is generic over it.

use std::time::Duration;

use async_trait::async_trait;
use qsql_resilient_client::{FallbackCache, RemoteKv};

pub struct LocalKv {
    cache: FallbackCache,
}

impl LocalKv {
    pub fn new(max_size: usize, default_ttl: Duration) -> Self {
        Self { cache: FallbackCache::new(max_size, default_ttl) }
    }
}

#[async_trait]
impl RemoteKv for LocalKv {
    async fn get(&self, key: &str) -> Result<Option<String>, String> {
        Ok(self.cache.get(key).await)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), String> {
        self.cache.set_with_ttl(key, value.to_string(), ttl).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), String> {
        self.cache.delete(key).await;
        Ok(())
    }
}
