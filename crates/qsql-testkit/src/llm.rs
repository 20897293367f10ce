//! `LlmProvider` fakes for scenario tests: a scripted provider that keys its
//! canned reply off a substring of the system prompt (mirrors how each
//! orchestrator node's prompt names its task), and a provider that always
//! fails, for exercising fallback paths.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use qsql_llm::{ChatMessage, LlmProvider, LlmResponse, TokenUsage};

/// One (substring, canned reply) rule. The first matching rule wins.
pub struct ScriptedReply {
    pub system_prompt_contains: &'static str,
    pub reply: String,
}

/// Returns a canned reply chosen by matching the system prompt against a
/// list of rules, falling back to `default_reply` if nothing matches.
pub struct ScriptedLlm {
    pub rules: Vec<ScriptedReply>,
    pub default_reply: String,
    pub calls: AtomicU64,
}

impl ScriptedLlm {
    pub fn new(rules: Vec<ScriptedReply>, default_reply: impl Into<String>) -> Self {
        Self {
            rules,
            default_reply: default_reply.into(),
            calls: AtomicU64::new(0),
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn complete(&self, _provider: &str, messages: &[ChatMessage]) -> Result<LlmResponse, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let system = messages.first().map(|m| m.content.as_str()).unwrap_or("");
        let content = self
            .rules
            .iter()
            .find(|rule| system.contains(rule.system_prompt_contains))
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(|| self.default_reply.clone());

        Ok(LlmResponse {
            content,
            model: "scripted".to_string(),
            usage: TokenUsage { prompt_tokens: 10, completion_tokens: 10 },
        })
    }
}

/// Always returns an error, for exercising an LLM provider's fallback path.
pub struct AlwaysFailsLlm {
    pub message: String,
}

impl AlwaysFailsLlm {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

impl Default for AlwaysFailsLlm {
    fn default() -> Self {
        Self::new("provider unavailable")
    }
}

#[async_trait]
impl LlmProvider for AlwaysFailsLlm {
    async fn complete(&self, _provider: &str, _messages: &[ChatMessage]) -> Result<LlmResponse, String> {
        Err(self.message.clone())
    }
}
