//! Resilient wrapper around a remote key-value dependency (Redis-shaped),
//! spec §4.2.
//!
//! Wraps any external client with (a) a breaker keyed by dependency name,
//! (b) retry per C1 for transient categories, (c) an optional in-memory
//! fallback cache. On GET failure, falls through to the cache GET; on SET
//! failure, writes through to the cache; on DELETE failure, evicts from the
//! cache. All fallback activity increments a per-op counter.

use std::sync::Arc;
use std::time::Duration;

use qsql_degraded::DegradedModeRegistry;
use qsql_resilience::{breaker::CircuitState, retry::RetryPolicy, BreakerRegistry, CircuitBreaker};
use qsql_schemas::ComponentStatus;
use serde::Serialize;
use tracing::warn;

use crate::cache::{CacheCounters, FallbackCache};

/// Minimal async contract a remote KV-shaped dependency must satisfy to be
/// wrapped. Implementations talk to Redis, or any similarly-shaped remote
/// cache; errors are opaque strings since the wrapper only cares whether a
/// call succeeded.
#[async_trait::async_trait]
pub trait RemoteKv: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, String>;
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), String>;
    async fn delete(&self, key: &str) -> Result<(), String>;
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct OpCounters {
    pub success: u64,
    pub failure: u64,
    pub fallback: u64,
}

#[derive(Debug, Default)]
struct Counters {
    get: OpCounters,
    set: OpCounters,
    delete: OpCounters,
}

#[derive(Debug, Serialize)]
pub struct WrapperStatus {
    pub name: String,
    pub breaker_state: String,
    pub cache_len: usize,
    pub cache_counters: CacheCounters,
    pub get: OpCounters,
    pub set: OpCounters,
    pub delete: OpCounters,
}

/// A resilient wrapper around a `RemoteKv`-shaped dependency.
pub struct ResilientKv<S: RemoteKv> {
    name: String,
    inner: S,
    breaker: Arc<CircuitBreaker>,
    cache: FallbackCache,
    retry_policy: RetryPolicy,
    counters: tokio::sync::Mutex<Counters>,
    degraded: Option<Arc<DegradedModeRegistry>>,
}

impl<S: RemoteKv> ResilientKv<S> {
    pub async fn new(
        name: impl Into<String>,
        inner: S,
        breakers: &BreakerRegistry,
        cache_max_size: usize,
        cache_ttl: Duration,
        retry_policy: RetryPolicy,
        degraded: Option<Arc<DegradedModeRegistry>>,
    ) -> Self {
        let name = name.into();
        let breaker = breakers.get_or_create(&name).await;
        if let Some(d) = &degraded {
            d.register(&name).await;
        }
        Self {
            name,
            inner,
            breaker,
            cache: FallbackCache::new(cache_max_size, cache_ttl),
            retry_policy,
            counters: tokio::sync::Mutex::new(Counters::default()),
            degraded,
        }
    }

    pub async fn is_available(&self) -> bool {
        self.breaker.state().await == CircuitState::Closed
    }

    pub async fn status(&self) -> WrapperStatus {
        let c = self.counters.lock().await;
        WrapperStatus {
            name: self.name.clone(),
            breaker_state: format!("{:?}", self.breaker.state().await),
            cache_len: self.cache.len().await,
            cache_counters: self.cache.counters().await,
            get: c.get,
            set: c.set,
            delete: c.delete,
        }
    }

    async fn mark_degraded(&self, reason: &str) {
        if let Some(d) = &self.degraded {
            d.update(
                &self.name,
                ComponentStatus::Degraded,
                Some(reason.to_string()),
                Some(true),
            )
            .await;
        }
    }

    async fn mark_recovered(&self) {
        if let Some(d) = &self.degraded {
            d.update(&self.name, ComponentStatus::Operational, None, Some(false))
                .await;
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if !self.breaker.allow().await {
            self.counters.lock().await.get.fallback += 1;
            return self.fallback_get(key).await;
        }

        let result = qsql_resilience::retry::retry(
            &self.retry_policy,
            |_e: &String| true,
            || self.inner.get(key),
        )
        .await;

        match result {
            Ok(v) => {
                self.breaker.record_success().await;
                self.mark_recovered().await;
                self.counters.lock().await.get.success += 1;
                if let Some(ref v) = v {
                    self.cache.set(key, v.clone()).await;
                }
                v
            }
            Err(e) => {
                self.breaker.record_failure().await;
                self.mark_degraded(&e).await;
                self.counters.lock().await.get.failure += 1;
                warn!(dep = %self.name, error = %e, "GET failed, falling back to local cache");
                self.counters.lock().await.get.fallback += 1;
                self.fallback_get(key).await
            }
        }
    }

    async fn fallback_get(&self, key: &str) -> Option<String> {
        self.cache.get(key).await
    }

    pub async fn set(&self, key: &str, value: &str, ttl: Duration) -> bool {
        if !self.breaker.allow().await {
            self.counters.lock().await.set.fallback += 1;
            self.cache.set_with_ttl(key, value, ttl).await;
            return false;
        }

        let result = qsql_resilience::retry::retry(
            &self.retry_policy,
            |_e: &String| true,
            || self.inner.set(key, value, ttl),
        )
        .await;

        match result {
            Ok(()) => {
                self.breaker.record_success().await;
                self.mark_recovered().await;
                self.counters.lock().await.set.success += 1;
                self.cache.set_with_ttl(key, value, ttl).await;
                true
            }
            Err(e) => {
                self.breaker.record_failure().await;
                self.mark_degraded(&e).await;
                self.counters.lock().await.set.failure += 1;
                self.counters.lock().await.set.fallback += 1;
                warn!(dep = %self.name, error = %e, "SET failed, writing through to local cache");
                self.cache.set_with_ttl(key, value, ttl).await;
                false
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        if !self.breaker.allow().await {
            self.counters.lock().await.delete.fallback += 1;
            self.cache.delete(key).await;
            return false;
        }

        let result = qsql_resilience::retry::retry(
            &self.retry_policy,
            |_e: &String| true,
            || self.inner.delete(key),
        )
        .await;

        match result {
            Ok(()) => {
                self.breaker.record_success().await;
                self.mark_recovered().await;
                self.counters.lock().await.delete.success += 1;
                self.cache.delete(key).await;
                true
            }
            Err(e) => {
                self.breaker.record_failure().await;
                self.mark_degraded(&e).await;
                self.counters.lock().await.delete.failure += 1;
                self.counters.lock().await.delete.fallback += 1;
                warn!(dep = %self.name, error = %e, "DELETE failed, evicting from local cache");
                self.cache.delete(key).await;
                false
            }
        }
    }
}
