//! qsql-llm — provider-agnostic LLM gateway with fallback chain (spec C14 /
//! §4.14).
//!
//! Grounded on `original_source/backend/app/core/llm_error_handler.py`:
//! `classify_llm_error`'s per-provider keyword heuristics, the
//! quota-skips-retry / rate-limit-retries-with-backoff / other-retries-once
//! decision tree in `retry_with_exponential_backoff`, and
//! `call_llm_with_fallback`'s provider chain (current provider first, then
//! the configured fallback order, skipping providers marked quota-exhausted
//! for the day) are carried over in full.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: TokenUsage,
}

/// Classified provider error, spec §4.14 step 1. Mirrors the original's
/// `LLMQuotaError` / `LLMRateLimitError` / generic `LLMProviderError`, plus
/// a `Transient` variant for the "retry once, then move on" branch the
/// original folds into its generic except-clause.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmError {
    QuotaExceeded {
        provider: String,
        message: String,
    },
    RateLimited {
        provider: String,
        message: String,
        retry_after: Option<u64>,
    },
    Transient {
        provider: String,
        message: String,
    },
    Provider {
        provider: String,
        message: String,
    },
}

impl LlmError {
    pub fn provider(&self) -> &str {
        match self {
            LlmError::QuotaExceeded { provider, .. }
            | LlmError::RateLimited { provider, .. }
            | LlmError::Transient { provider, .. }
            | LlmError::Provider { provider, .. } => provider,
        }
    }

    /// Grounded on `format_user_friendly_error`.
    pub fn user_message(&self) -> String {
        match self {
            LlmError::QuotaExceeded { provider, .. } => format!(
                "The {provider} AI service has reached its usage quota. Please try again later."
            ),
            LlmError::RateLimited { provider, retry_after, .. } => match retry_after {
                Some(s) => format!(
                    "The {provider} AI service is currently experiencing high demand. Please try again in {s} seconds."
                ),
                None => format!(
                    "The {provider} AI service is currently experiencing high demand."
                ),
            },
            LlmError::Transient { provider, .. } | LlmError::Provider { provider, .. } => format!(
                "The {provider} AI service encountered an error. Please try again or contact support if the issue persists."
            ),
        }
    }
}

/// Classifies a raw provider error string, spec §4.14 / original
/// `classify_llm_error`. `retry_after` comes from a `Retry-After` response
/// header when the caller has one to pass along.
pub fn classify_llm_error(provider: &str, raw_message: &str, retry_after: Option<u64>) -> LlmError {
    let lower = raw_message.to_lowercase();

    let rate_limit_phrases = ["rate limit", "requests per minute", "throttl", "429"];
    let quota_phrases = ["quota", "resource_exhausted", "insufficient credits", "insufficient"];

    let looks_rate_limited = rate_limit_phrases.iter().any(|p| lower.contains(p));
    let looks_quota = quota_phrases.iter().any(|p| lower.contains(p));

    // Per-provider nuance from the original: Gemini quota errors that also
    // mention rate-limit phrasing are rate limits, not quota exhaustion.
    if provider == "gemini" && looks_quota {
        if lower.contains("rate limit") || lower.contains("requests per minute") {
            return LlmError::RateLimited {
                provider: provider.to_string(),
                message: raw_message.to_string(),
                retry_after: Some(retry_after.unwrap_or(60)),
            };
        }
        return LlmError::QuotaExceeded {
            provider: provider.to_string(),
            message: raw_message.to_string(),
        };
    }

    if looks_rate_limited {
        return LlmError::RateLimited {
            provider: provider.to_string(),
            message: raw_message.to_string(),
            retry_after: Some(retry_after.unwrap_or(60)),
        };
    }
    if looks_quota {
        return LlmError::QuotaExceeded {
            provider: provider.to_string(),
            message: raw_message.to_string(),
        };
    }
    if lower.contains("too many requests") {
        return LlmError::RateLimited {
            provider: provider.to_string(),
            message: raw_message.to_string(),
            retry_after: Some(retry_after.unwrap_or(60)),
        };
    }

    LlmError::Provider {
        provider: provider.to_string(),
        message: raw_message.to_string(),
    }
}

/// A backend LLM provider implementation. Each call receives the provider
/// name it was invoked under (the gateway is provider-agnostic; the
/// implementor dispatches internally), so a single adapter can back several
/// configured provider names if desired.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        provider: &str,
        messages: &[ChatMessage],
    ) -> Result<LlmResponse, String>;
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Providers configured for this deployment, in fallback priority
    /// order. Spec §4.14: "supported providers are enumerated in
    /// configuration" — grounded on the original's hardcoded
    /// `['mistral', 'gemini', 'openrouter', 'qwen', 'bedrock']` default.
    pub providers: Vec<String>,
    pub max_retries_per_provider: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                "mistral".to_string(),
                "gemini".to_string(),
                "openrouter".to_string(),
                "qwen".to_string(),
                "bedrock".to_string(),
            ],
            max_retries_per_provider: 2,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
        }
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Provider-agnostic LLM gateway, spec §4.14. Wraps one [`LlmProvider`]
/// implementation (which dispatches per-provider internally) with
/// classification, per-provider retry, and a fallback chain that skips any
/// provider marked quota-exhausted for the current day.
pub struct LlmGateway {
    provider: Box<dyn LlmProvider>,
    config: GatewayConfig,
    /// `(date, provider)` pairs marked quota-exhausted. Spec §4.14 step 3:
    /// "no provider is retried once marked quota-exhausted for the current
    /// day" — the date component makes the mark self-expiring at midnight
    /// without a separate TTL sweep.
    exhausted: Mutex<HashSet<(String, String)>>,
}

impl LlmGateway {
    pub fn new(provider: Box<dyn LlmProvider>, config: GatewayConfig) -> Self {
        Self {
            provider,
            config,
            exhausted: Mutex::new(HashSet::new()),
        }
    }

    /// Fallback order for `current`: `current` first, then the configured
    /// list with `current` removed, preserving its relative order. Grounded
    /// on `get_fallback_providers`.
    fn fallback_chain(&self, current: &str, enable_fallback: bool) -> Vec<String> {
        let mut chain = vec![current.to_string()];
        if enable_fallback {
            chain.extend(
                self.config
                    .providers
                    .iter()
                    .filter(|p| p.as_str() != current)
                    .cloned(),
            );
        }
        chain
    }

    async fn is_exhausted(&self, provider: &str) -> bool {
        self.exhausted
            .lock()
            .await
            .contains(&(today(), provider.to_string()))
    }

    async fn mark_exhausted(&self, provider: &str) {
        self.exhausted
            .lock()
            .await
            .insert((today(), provider.to_string()));
    }

    /// Attempts `provider` with retry per spec §4.14 step 1: rate limits
    /// retry with backoff, quota errors never retry, everything else
    /// retries exactly once before giving up on this provider.
    async fn attempt_with_retry(
        &self,
        provider: &str,
        messages: &[ChatMessage],
    ) -> Result<LlmResponse, LlmError> {
        let mut attempt = 0u32;
        loop {
            match self.provider.complete(provider, messages).await {
                Ok(response) => return Ok(response),
                Err(raw) => {
                    let classified = classify_llm_error(provider, &raw, None);
                    match &classified {
                        LlmError::QuotaExceeded { .. } => {
                            error!(provider, "quota exhausted, no retry");
                            return Err(classified);
                        }
                        LlmError::RateLimited { retry_after, .. } => {
                            if attempt >= self.config.max_retries_per_provider {
                                error!(provider, "rate limit - max retries exceeded");
                                return Err(classified);
                            }
                            let delay = match retry_after {
                                Some(s) => Duration::from_secs(*s).min(self.config.max_delay),
                                None => {
                                    let scaled = self.config.initial_delay.as_secs_f64()
                                        * self.config.exponential_base.powi(attempt as i32);
                                    Duration::from_secs_f64(scaled).min(self.config.max_delay)
                                }
                            };
                            warn!(provider, attempt, ?delay, "rate limit hit, retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                        LlmError::Transient { .. } | LlmError::Provider { .. } => {
                            if attempt >= self.config.max_retries_per_provider {
                                error!(provider, "max retries exceeded");
                                return Err(classified);
                            }
                            let scaled = self.config.initial_delay.as_secs_f64()
                                * self.config.exponential_base.powi(attempt as i32);
                            let delay = Duration::from_secs_f64(scaled).min(self.config.max_delay);
                            warn!(provider, attempt, ?delay, "error, retrying");
                            tokio::time::sleep(delay).await;
                            attempt += 1;
                        }
                    }
                }
            }
        }
    }

    /// spec §4.14 `invoke(messages, provider, enable_fallback)`. Walks the
    /// fallback chain, skipping any provider already marked quota-exhausted
    /// for today, returning the first success as `(response, provider_used)`.
    pub async fn invoke(
        &self,
        messages: &[ChatMessage],
        provider: &str,
        enable_fallback: bool,
    ) -> Result<(LlmResponse, String), LlmError> {
        let chain = self.fallback_chain(provider, enable_fallback);
        let mut last_err: Option<LlmError> = None;

        for candidate in &chain {
            if self.is_exhausted(candidate).await {
                info!(provider = candidate, "skipping, quota-exhausted today");
                continue;
            }

            info!(provider = candidate, "attempting LLM call");
            match self.attempt_with_retry(candidate, messages).await {
                Ok(response) => {
                    if candidate != provider {
                        info!(from = provider, to = candidate, "failed over to fallback provider");
                    }
                    return Ok((response, candidate.clone()));
                }
                Err(err @ LlmError::QuotaExceeded { .. }) => {
                    self.mark_exhausted(candidate).await;
                    last_err = Some(err);
                }
                Err(err) => {
                    last_err = Some(err);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| LlmError::Provider {
            provider: provider.to_string(),
            message: "no providers configured".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;

    struct ScriptedProvider {
        calls: AtomicU32,
        // queued outcomes keyed by provider name, consumed in order
        script: StdMutex<std::collections::HashMap<String, Vec<Result<LlmResponse, String>>>>,
    }

    fn ok_response() -> LlmResponse {
        LlmResponse {
            content: "hi".to_string(),
            model: "test-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
            },
        }
    }

    #[async_trait::async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn complete(
            &self,
            provider: &str,
            _messages: &[ChatMessage],
        ) -> Result<LlmResponse, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            match script.get_mut(provider).and_then(|q| if q.is_empty() { None } else { Some(q.remove(0)) }) {
                Some(outcome) => outcome,
                None => Err("no script entry".to_string()),
            }
        }
    }

    fn fast_config() -> GatewayConfig {
        GatewayConfig {
            providers: vec!["mistral".to_string(), "gemini".to_string()],
            max_retries_per_provider: 1,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            exponential_base: 2.0,
        }
    }

    #[test]
    fn classify_quota_error() {
        let err = classify_llm_error("mistral", "insufficient quota remaining", None);
        assert!(matches!(err, LlmError::QuotaExceeded { .. }));
    }

    #[test]
    fn classify_rate_limit_error() {
        let err = classify_llm_error("qwen", "429 too many requests, throttled", None);
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[test]
    fn gemini_quota_with_rate_limit_phrasing_is_rate_limited() {
        let err = classify_llm_error("gemini", "resource_exhausted: rate limit exceeded", None);
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_skips_to_next_provider() {
        let mut script = std::collections::HashMap::new();
        script.insert(
            "mistral".to_string(),
            vec![Err("quota exceeded for today".to_string())],
        );
        script.insert("gemini".to_string(), vec![Ok(ok_response())]);
        let provider = ScriptedProvider {
            calls: AtomicU32::new(0),
            script: StdMutex::new(script),
        };
        let gateway = LlmGateway::new(Box::new(provider), fast_config());

        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        }];
        let (response, used) = gateway.invoke(&messages, "mistral", true).await.unwrap();
        assert_eq!(used, "gemini");
        assert_eq!(response.content, "hi");

        // Second call should skip mistral entirely since it's now marked
        // exhausted for today.
        assert!(gateway.is_exhausted("mistral").await);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_retries_before_succeeding() {
        let mut script = std::collections::HashMap::new();
        script.insert(
            "mistral".to_string(),
            vec![
                Err("429 rate limit exceeded".to_string()),
                Ok(ok_response()),
            ],
        );
        let provider = ScriptedProvider {
            calls: AtomicU32::new(0),
            script: StdMutex::new(script),
        };
        let gateway = LlmGateway::new(Box::new(provider), fast_config());
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        }];
        let (_, used) = gateway.invoke(&messages, "mistral", false).await.unwrap();
        assert_eq!(used, "mistral");
    }

    #[tokio::test(start_paused = true)]
    async fn no_fallback_does_not_try_other_providers() {
        let mut script = std::collections::HashMap::new();
        script.insert(
            "mistral".to_string(),
            vec![Err("quota exceeded".to_string())],
        );
        let provider = ScriptedProvider {
            calls: AtomicU32::new(0),
            script: StdMutex::new(script),
        };
        let gateway = LlmGateway::new(Box::new(provider), fast_config());
        let messages = vec![ChatMessage {
            role: "user".to_string(),
            content: "hi".to_string(),
        }];
        let result = gateway.invoke(&messages, "mistral", false).await;
        assert!(result.is_err());
    }
}
