//! Typed configuration sections, SPEC_FULL §3: "role tables, dialect
//! conversion tables, rate-limit tiers, and breaker/pool tunables from
//! JSON/YAML". Dialect conversion itself is a fixed rule table owned by
//! `qsql-validator::dialect` (spec §8 idempotence is a structural property
//! of that table, not something operators should be able to misconfigure),
//! so this module only carries the sections operators legitimately tune:
//! pool sizing, breaker thresholds, rate-limit overrides, and the LLM
//! provider chain. Every field has a default so a deployment can ship a
//! partial YAML overlay and still get a complete, valid config.

use serde::{Deserialize, Serialize};

fn default_pool_size() -> usize {
    4
}
fn default_max_queries_per_process() -> u64 {
    1000
}
fn default_error_threshold() -> u32 {
    3
}
fn default_acquire_timeout_seconds() -> u64 {
    5
}
fn default_drain_timeout_seconds() -> u64 {
    10
}
fn default_health_check_interval_seconds() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
    pub pool_size: usize,
    pub max_queries_per_process: u64,
    pub error_threshold: u32,
    pub acquire_timeout_seconds: u64,
    pub drain_timeout_seconds: u64,
    pub health_check_interval_seconds: u64,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            max_queries_per_process: default_max_queries_per_process(),
            error_threshold: default_error_threshold(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
            drain_timeout_seconds: default_drain_timeout_seconds(),
            health_check_interval_seconds: default_health_check_interval_seconds(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}
fn default_recovery_timeout_seconds() -> u64 {
    60
}
fn default_success_threshold() -> u32 {
    2
}

/// One named breaker's tunables (keyed by dependency name, e.g. "redis",
/// "oracle-pool") — a flat, serializable counterpart to
/// `qsql_resilience::CircuitBreakerConfig`, which itself stores a
/// `Duration` and isn't `Deserialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout_seconds: u64,
    pub success_threshold: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout_seconds(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Rate-limit tier/override entry, data counterpart to
/// `qsql_ratelimit`'s hardcoded defaults — present here so a deployment can
/// retune request ceilings without a recompile. `endpoint: None` means
/// "tier default"; `Some(path)` means "override for this endpoint only",
/// mirroring the original's `ENDPOINT_RATE_LIMITS` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub role: String,
    pub endpoint: Option<String>,
    pub max_requests: u32,
    pub window_seconds: u64,
}

fn default_llm_providers() -> Vec<String> {
    vec![
        "mistral".to_string(),
        "gemini".to_string(),
        "openrouter".to_string(),
        "qwen".to_string(),
        "bedrock".to_string(),
    ]
}
fn default_max_retries_per_provider() -> u32 {
    2
}
fn default_initial_delay_seconds() -> u64 {
    1
}
fn default_max_delay_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub providers: Vec<String>,
    pub max_retries_per_provider: u32,
    pub initial_delay_seconds: u64,
    pub max_delay_seconds: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            providers: default_llm_providers(),
            max_retries_per_provider: default_max_retries_per_provider(),
            initial_delay_seconds: default_initial_delay_seconds(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

fn default_schema_cache_ttl_seconds() -> u64 {
    3600
}

/// Top-level application configuration, assembled from a layered YAML
/// overlay via [`crate::parse_typed`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pool: PoolSettings,
    pub breakers: std::collections::BTreeMap<String, BreakerSettings>,
    pub rate_limit_overrides: Vec<RateLimitEntry>,
    pub llm: LlmSettings,
    /// Spec §9 Open Question, decided in DESIGN.md: fixed at 1h, no
    /// invalidation-on-write. Configurable here only as a deployment-wide
    /// knob, not per-table.
    pub schema_cache_ttl_seconds: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            pool: PoolSettings::default(),
            breakers: std::collections::BTreeMap::new(),
            rate_limit_overrides: Vec::new(),
            llm: LlmSettings::default(),
            schema_cache_ttl_seconds: default_schema_cache_ttl_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_app_config_matches_hardcoded_crate_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.pool.pool_size, 4);
        assert_eq!(config.schema_cache_ttl_seconds, 3600);
        assert_eq!(config.llm.providers.len(), 5);
    }

    #[test]
    fn partial_json_fills_remaining_fields_with_defaults() {
        let partial = serde_json::json!({"pool": {"pool_size": 10}});
        let config: AppConfig = serde_json::from_value(partial).unwrap();
        assert_eq!(config.pool.pool_size, 10);
        assert_eq!(config.pool.error_threshold, 3);
    }
}
