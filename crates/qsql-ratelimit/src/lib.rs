//! qsql-ratelimit — per-user, per-endpoint sliding-window rate limiting
//! (spec C13 / §4.13).
//!
//! Grounded on `original_source/backend/app/core/rate_limiter.py`: the
//! per-role tier defaults, the endpoint-specific override table for the
//! query submit/process routes, and the sliding-window algorithm (drop
//! entries older than the window, count what's left, reject at the
//! ceiling, otherwise record the request) are carried over. The original
//! keeps the window in a Redis sorted set (`ZADD`/`ZREMRANGEBYSCORE`/
//! `ZCARD`); [`qsql_resilient_client::RemoteKv`] only exposes
//! get/set/delete, so the window is serialized as a JSON array of epoch
//! timestamps under one key instead.

use std::time::Duration;

use chrono::Utc;
use qsql_resilient_client::{RemoteKv, ResilientKv};
use qsql_schemas::Role;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Tier defaults, spec §4.13 / original `RATE_LIMIT_CONFIGS`. Reuses
/// `qsql_schemas::Role` directly rather than a parallel `RateLimitTier`
/// enum: the original kept them separate because its role system had no
/// shared module to draw from, but this workspace already has one
/// canonical role ordering and duplicating it here would just invite drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl RateLimitConfig {
    const fn new(max_requests: u32, window_seconds: u64) -> Self {
        Self {
            max_requests,
            window_seconds,
        }
    }
}

fn default_config(role: Role) -> RateLimitConfig {
    match role {
        Role::Guest => RateLimitConfig::new(10, 60),
        Role::Viewer => RateLimitConfig::new(30, 60),
        Role::Analyst => RateLimitConfig::new(100, 60),
        // Not present in the original's four tiers; bridges this
        // workspace's fifth role in between analyst and admin rather than
        // falling back to the analyst default, which would under-serve it.
        Role::Developer => RateLimitConfig::new(300, 60),
        Role::Admin => RateLimitConfig::new(1000, 60),
    }
}

/// Endpoint-specific override, spec §4.13 / original `ENDPOINT_RATE_LIMITS`.
/// Only the two query-submission routes get a tighter limit than the
/// tier default; every other endpoint falls through to `default_config`.
fn endpoint_override(endpoint: &str, role: Role) -> Option<RateLimitConfig> {
    let is_submit_route = matches!(
        endpoint,
        "/api/v1/queries/submit" | "/api/v1/queries/process"
    );
    if !is_submit_route {
        return None;
    }
    Some(match role {
        Role::Guest => RateLimitConfig::new(5, 60),
        Role::Viewer => RateLimitConfig::new(10, 60),
        Role::Analyst => RateLimitConfig::new(50, 60),
        Role::Developer => RateLimitConfig::new(150, 60),
        Role::Admin => RateLimitConfig::new(500, 60),
    })
}

fn config_for(endpoint: &str, role: Role) -> RateLimitConfig {
    endpoint_override(endpoint, role).unwrap_or_else(|| default_config(role))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub used: u32,
    pub window_seconds: u64,
    pub retry_after_seconds: Option<u64>,
    /// Set when the store was unreachable and the request was allowed
    /// through fail-open rather than a genuine under-limit check.
    pub degraded: bool,
}

fn now_epoch() -> f64 {
    Utc::now().timestamp_millis() as f64 / 1000.0
}

fn window_key(user: &str, endpoint: &str) -> String {
    format!("ratelimit:{user}:{endpoint}")
}

/// Sliding-window rate limiter over a resilient KV store, spec §4.13.
pub struct RateLimiter<K: RemoteKv> {
    kv: ResilientKv<K>,
}

impl<K: RemoteKv> RateLimiter<K> {
    pub fn new(kv: ResilientKv<K>) -> Self {
        Self { kv }
    }

    async fn load_window(&self, key: &str) -> Vec<f64> {
        match self.kv.get(key).await {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_default(),
            None => Vec::new(),
        }
    }

    /// spec §4.13 `check_rate_limit`: counts the request toward the
    /// window when allowed, fails open (allowed, remaining = limit) with
    /// `degraded = true` if the store is unusable.
    pub async fn check_rate_limit(&self, user: &str, endpoint: &str, role: Role) -> RateLimitStatus {
        let config = config_for(endpoint, role);
        let key = window_key(user, endpoint);
        let now = now_epoch();
        let window_start = now - config.window_seconds as f64;

        let mut entries = self.load_window(&key).await;
        entries.retain(|&t| t > window_start);

        let used = entries.len() as u32;
        if used >= config.max_requests {
            let oldest = entries.iter().cloned().fold(f64::MAX, f64::min);
            let retry_after = if oldest.is_finite() {
                ((oldest + config.window_seconds as f64) - now).max(0.0).ceil() as u64
            } else {
                config.window_seconds
            };
            warn!(
                user,
                endpoint,
                requests = used,
                limit = config.max_requests,
                "rate limit exceeded"
            );
            return RateLimitStatus {
                allowed: false,
                limit: config.max_requests,
                remaining: 0,
                used,
                window_seconds: config.window_seconds,
                retry_after_seconds: Some(retry_after),
                degraded: false,
            };
        }

        entries.push(now);
        let encoded = match serde_json::to_string(&entries) {
            Ok(s) => s,
            Err(_) => {
                return RateLimitStatus {
                    allowed: true,
                    limit: config.max_requests,
                    remaining: config.max_requests,
                    used: 0,
                    window_seconds: config.window_seconds,
                    retry_after_seconds: None,
                    degraded: true,
                }
            }
        };
        let ttl = Duration::from_secs(config.window_seconds + 60);
        self.kv.set(&key, &encoded, ttl).await;

        RateLimitStatus {
            allowed: true,
            limit: config.max_requests,
            remaining: config.max_requests - used - 1,
            used: used + 1,
            window_seconds: config.window_seconds,
            retry_after_seconds: None,
            degraded: false,
        }
    }

    /// spec §4.13 `get_rate_limit_status`: read-only, does not record a
    /// request against the window.
    pub async fn get_rate_limit_status(
        &self,
        user: &str,
        endpoint: &str,
        role: Role,
    ) -> RateLimitStatus {
        let config = config_for(endpoint, role);
        let key = window_key(user, endpoint);
        let now = now_epoch();
        let window_start = now - config.window_seconds as f64;

        let mut entries = self.load_window(&key).await;
        entries.retain(|&t| t > window_start);
        let used = entries.len() as u32;
        let remaining = config.max_requests.saturating_sub(used);

        RateLimitStatus {
            allowed: remaining > 0,
            limit: config.max_requests,
            remaining,
            used,
            window_seconds: config.window_seconds,
            retry_after_seconds: None,
            degraded: false,
        }
    }

    /// spec §4.13 `reset_user_rate_limit`, single-endpoint form. The
    /// original also supports a wildcard reset across every endpoint for a
    /// user via a Redis `KEYS` pattern scan; `RemoteKv` has no key-listing
    /// primitive, so that form is dropped rather than faked with a scan
    /// this abstraction cannot honestly perform.
    pub async fn reset_user_rate_limit(&self, user: &str, endpoint: &str) {
        let key = window_key(user, endpoint);
        self.kv.delete(&key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use qsql_resilience::{retry::RetryPolicy, BreakerRegistry};
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    struct MemoryKv {
        store: StdMutex<HashMap<String, String>>,
    }

    impl MemoryKv {
        fn new() -> Self {
            Self {
                store: StdMutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl RemoteKv for MemoryKv {
        async fn get(&self, key: &str) -> Result<Option<String>, String> {
            Ok(self.store.lock().unwrap().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str, _ttl: Duration) -> Result<(), String> {
            self.store
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn delete(&self, key: &str) -> Result<(), String> {
            self.store.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            cap: Duration::from_millis(5),
            jitter_factor: 0.0,
            strategy: qsql_resilience::RetryStrategy::Fixed,
        }
    }

    async fn limiter() -> RateLimiter<MemoryKv> {
        let breakers = BreakerRegistry::new();
        let kv = ResilientKv::new(
            "ratelimit",
            MemoryKv::new(),
            &breakers,
            64,
            Duration::from_secs(120),
            fast_retry(),
            None,
        )
        .await;
        RateLimiter::new(kv)
    }

    #[tokio::test]
    async fn allows_within_limit_and_tracks_remaining() {
        let rl = limiter().await;
        let status = rl.check_rate_limit("alice", "/api/v1/other", Role::Guest).await;
        assert!(status.allowed);
        assert_eq!(status.limit, 10);
        assert_eq!(status.remaining, 9);
    }

    #[tokio::test]
    async fn rejects_once_ceiling_is_hit() {
        let rl = limiter().await;
        for _ in 0..5 {
            let s = rl
                .check_rate_limit("bob", "/api/v1/queries/submit", Role::Guest)
                .await;
            assert!(s.allowed);
        }
        let rejected = rl
            .check_rate_limit("bob", "/api/v1/queries/submit", Role::Guest)
            .await;
        assert!(!rejected.allowed);
        assert!(rejected.retry_after_seconds.is_some());
    }

    #[tokio::test]
    async fn endpoint_override_is_tighter_than_tier_default() {
        let rl = limiter().await;
        let status = rl
            .check_rate_limit("carol", "/api/v1/queries/submit", Role::Admin)
            .await;
        assert_eq!(status.limit, 500);
    }

    #[tokio::test]
    async fn status_check_does_not_increment() {
        let rl = limiter().await;
        rl.check_rate_limit("dave", "/api/v1/other", Role::Viewer).await;
        let before = rl.get_rate_limit_status("dave", "/api/v1/other", Role::Viewer).await;
        let after = rl.get_rate_limit_status("dave", "/api/v1/other", Role::Viewer).await;
        assert_eq!(before.used, after.used);
    }

    #[tokio::test]
    async fn reset_clears_the_window() {
        let rl = limiter().await;
        rl.check_rate_limit("erin", "/api/v1/other", Role::Viewer).await;
        rl.reset_user_rate_limit("erin", "/api/v1/other").await;
        let status = rl.get_rate_limit_status("erin", "/api/v1/other", Role::Viewer).await;
        assert_eq!(status.used, 0);
    }
}
