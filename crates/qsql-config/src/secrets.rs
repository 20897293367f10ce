//! Secret resolution.
//!
//! Grounded on `mqk-config::secrets`: config YAML stores only environment
//! variable **names**, never values; `resolve_secrets` is called once at
//! startup and the result passed into constructors rather than scattering
//! `std::env::var` calls through the workspace. `Debug` on
//! [`ResolvedSecrets`] redacts every value, and error messages name the
//! missing env var, never a value.

use anyhow::{bail, Result};
use serde_json::Value;

fn read_str_at(config: &Value, pointer: &str) -> Option<String> {
    let s = config.pointer(pointer)?.as_str()?;
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn resolve_env(var_name: &str) -> Option<String> {
    match std::env::var(var_name) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

struct SecretEnvNames {
    oracle_dsn_var: String,
    postgres_dsn_var: String,
    redis_url_var: String,
    llm_provider_key_vars: Vec<(String, String)>,
}

fn parse_env_names(config_json: &Value) -> SecretEnvNames {
    let providers = config_json
        .pointer("/llm/providers")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
        })
        .unwrap_or_else(|| {
            vec![
                "mistral".to_string(),
                "gemini".to_string(),
                "openrouter".to_string(),
                "qwen".to_string(),
                "bedrock".to_string(),
            ]
        });

    let llm_provider_key_vars = providers
        .into_iter()
        .map(|provider| {
            let pointer = format!("/secrets/llm/{provider}_api_key_env");
            let var = read_str_at(config_json, &pointer)
                .unwrap_or_else(|| format!("QSQL_{}_API_KEY", provider.to_uppercase()));
            (provider, var)
        })
        .collect();

    SecretEnvNames {
        oracle_dsn_var: read_str_at(config_json, "/secrets/oracle_dsn_env")
            .unwrap_or_else(|| "QSQL_ORACLE_DSN".to_string()),
        postgres_dsn_var: read_str_at(config_json, "/secrets/postgres_dsn_env")
            .unwrap_or_else(|| "QSQL_POSTGRES_DSN".to_string()),
        redis_url_var: read_str_at(config_json, "/secrets/redis_url_env")
            .unwrap_or_else(|| "QSQL_REDIS_URL".to_string()),
        llm_provider_key_vars,
    }
}

/// All runtime-resolved secrets for one daemon instantiation. Built once at
/// startup via [`resolve_secrets`] and passed into constructors.
#[derive(Clone)]
pub struct ResolvedSecrets {
    pub oracle_dsn: Option<String>,
    pub postgres_dsn: Option<String>,
    pub redis_url: Option<String>,
    /// Provider name -> API key, only for providers whose env var was set.
    /// A provider absent here simply can't be dispatched to — spec §4.14's
    /// gateway treats it like any other permanently-unavailable provider.
    pub llm_api_keys: std::collections::BTreeMap<String, String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("oracle_dsn", &self.oracle_dsn.as_ref().map(|_| "<REDACTED>"))
            .field("postgres_dsn", &self.postgres_dsn.as_ref().map(|_| "<REDACTED>"))
            .field("redis_url", &self.redis_url.as_ref().map(|_| "<REDACTED>"))
            .field(
                "llm_api_keys",
                &self
                    .llm_api_keys
                    .keys()
                    .map(|k| (k.clone(), "<REDACTED>"))
                    .collect::<std::collections::BTreeMap<_, _>>(),
            )
            .finish()
    }
}

/// Which backends this deployment must be able to reach. Oracle/Postgres
/// need a DSN to function at all; Doris talks to an MCP session configured
/// separately and carries no DSN secret here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredBackend {
    Oracle,
    Postgres,
}

/// Resolves secrets from the environment, enforcing that every backend in
/// `required` has its DSN set. Unlike the teacher's mode-aware enforcement
/// (LIVE/PAPER/BACKTEST), this domain has no operating-mode axis — the
/// axis is simply "which backends does this deployment route to", supplied
/// by the caller from its own `qsql-router` wiring.
///
/// # Errors
/// Returns `Err` naming the missing env var. The value is never mentioned.
pub fn resolve_secrets(config_json: &Value, required: &[RequiredBackend]) -> Result<ResolvedSecrets> {
    let names = parse_env_names(config_json);

    let oracle_dsn = resolve_env(&names.oracle_dsn_var);
    let postgres_dsn = resolve_env(&names.postgres_dsn_var);
    let redis_url = resolve_env(&names.redis_url_var);

    if required.contains(&RequiredBackend::Oracle) && oracle_dsn.is_none() {
        bail!(
            "SECRETS_MISSING: required env var '{}' (Oracle DSN) is not set or empty",
            names.oracle_dsn_var,
        );
    }
    if required.contains(&RequiredBackend::Postgres) && postgres_dsn.is_none() {
        bail!(
            "SECRETS_MISSING: required env var '{}' (Postgres DSN) is not set or empty",
            names.postgres_dsn_var,
        );
    }

    let llm_api_keys = names
        .llm_provider_key_vars
        .into_iter()
        .filter_map(|(provider, var)| resolve_env(&var).map(|key| (provider, key)))
        .collect();

    Ok(ResolvedSecrets {
        oracle_dsn,
        postgres_dsn,
        redis_url,
        llm_api_keys,
    })
}
