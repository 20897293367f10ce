//! The LLM provider default for a deployment with no live model backend
//! wired in. Spec §1 treats "the LLM/DB wire protocols themselves" as an
//! external collaborator with only its contract specified — concretely
//! speaking to Mistral/Gemini/OpenRouter/Qwen/Bedrock is out of scope for
//! this workspace, the same way `UnconfiguredSchemaSource` and
//! `DatabaseRouter::new(None, None, None, ..)` stand in for catalog and
//! execution adapters that aren't implemented here either.

use qsql_llm::{ChatMessage, LlmProvider, LlmResponse};

pub struct UnconfiguredLlmProvider;

#[async_trait::async_trait]
impl LlmProvider for UnconfiguredLlmProvider {
    async fn complete(
        &self,
        provider: &str,
        _messages: &[ChatMessage],
    ) -> Result<LlmResponse, String> {
        Err(format!("LLM provider '{provider}' is not configured for this deployment"))
    }
}
