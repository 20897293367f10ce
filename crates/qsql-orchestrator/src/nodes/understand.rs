//! Node 1: `understand`, spec §4.10.
//!
//! Grounded on `original_source/backend/app/orchestrator/nodes/understand.py`'s
//! `understand_query_node`: an LLM call producing strict-JSON taxonomy,
//! falling back to [`crate::taxonomy_fallback`] on parse/validation failure.

use qsql_llm::ChatMessage;
use qsql_resilient_client::RemoteKv;
use qsql_schemas::{Intent, QueryState};

use crate::checkpoint::CheckpointStore;
use crate::nodes::extract_json_object;
use crate::runtime::Runtime;
use crate::taxonomy_fallback;

const SYSTEM_PROMPT: &str = "You are a database query intent classifier for business \
intelligence. Classify the user's natural-language query and respond with ONLY a JSON \
object with keys: query_type, complexity, domain, temporal (boolean), \
expected_cardinality, tables (array of strings), entities (array of strings), \
aggregations (array of strings), filters (array of strings), joins_count (integer).";

pub async fn run<K: RemoteKv, C: CheckpointStore>(rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.understand", query_id = %state.query_id);
    let _enter = span.enter();

    state.push_thinking_step("understand", "Analyzing user query intent");

    let messages = vec![
        ChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: state.user_query.clone(),
        },
    ];

    let intent = match rt
        .llm
        .invoke(&messages, &rt.config.llm_provider, rt.config.llm_enable_fallback)
        .await
    {
        Ok((response, provider)) => {
            state.llm_metadata.provider_used = Some(provider);
            parse_taxonomy(&response.content).unwrap_or_else(|| {
                state.push_thinking_step(
                    "understand",
                    "LLM taxonomy response invalid, falling back to keyword classifier",
                );
                taxonomy_fallback::classify(&state.user_query)
            })
        }
        Err(err) => {
            state.push_thinking_step(
                "understand",
                format!("LLM unavailable ({err:?}), falling back to keyword classifier"),
            );
            taxonomy_fallback::classify(&state.user_query)
        }
    };

    state.push_message(
        "assistant",
        format!(
            "Classified as {} ({} complexity, {} domain, source={})",
            intent.query_type, intent.complexity, intent.domain, intent.source
        ),
    );
    state.intent = Some(intent);
    state.next_action = "retrieve_context".to_string();
}

fn parse_taxonomy(text: &str) -> Option<Intent> {
    let json_str = extract_json_object(text)?;
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;

    let query_type = value.get("query_type")?.as_str()?.to_string();
    let complexity = value.get("complexity")?.as_str()?.to_string();
    let domain = value.get("domain")?.as_str()?.to_string();
    let expected_cardinality = value.get("expected_cardinality")?.as_str()?.to_string();
    let temporal = value.get("temporal").and_then(|v| v.as_bool()).unwrap_or(false);
    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let joins_count = value.get("joins_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    Some(Intent {
        query_type,
        complexity,
        domain,
        temporal,
        expected_cardinality,
        tables: string_list("tables"),
        entities: string_list("entities"),
        aggregations: string_list("aggregations"),
        filters: string_list("filters"),
        joins_count,
        source: "llm".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_taxonomy_accepts_well_formed_json() {
        let text = r#"Sure, here you go:
        {"query_type": "aggregation", "complexity": "medium", "domain": "sales",
         "temporal": false, "expected_cardinality": "summary", "tables": ["ORDERS"],
         "entities": [], "aggregations": ["sum"], "filters": [], "joins_count": 0}"#;
        let intent = parse_taxonomy(text).unwrap();
        assert_eq!(intent.query_type, "aggregation");
        assert_eq!(intent.tables, vec!["ORDERS".to_string()]);
        assert_eq!(intent.source, "llm");
    }

    #[test]
    fn parse_taxonomy_rejects_missing_required_field() {
        let text = r#"{"query_type": "aggregation"}"#;
        assert!(parse_taxonomy(text).is_none());
    }
}
