//! Node 3: `generate_hypothesis`, spec §4.10.
//!
//! Grounded on `original_source/backend/app/orchestrator/nodes/hypothesis.py`:
//! an LLM call proposing a structured query plan, with strict JSON validation
//! matched by `_validate_hypothesis_payload`. Unlike `understand`, a failure
//! here never terminates the pipeline — it degrades to a plain-text plan and
//! continues, since a human-readable hypothesis is still useful context for
//! `generate_sql` even when structure extraction fails.

use qsql_llm::ChatMessage;
use qsql_resilient_client::RemoteKv;
use qsql_schemas::{Hypothesis, QueryState};

use crate::checkpoint::CheckpointStore;
use crate::nodes::extract_json_object;
use crate::runtime::Runtime;

const HYPOTHESIS_CONFIDENCE: &[&str] = &["high", "medium", "low"];

const SYSTEM_PROMPT: &str = "You are a query-planning assistant for business intelligence \
over a relational schema. Given the user's question and the available tables/columns, \
propose a query plan. Respond with ONLY a JSON object with keys: main_table (string), \
additional_tables (array of strings), joins (array of strings), filters (array of \
strings), aggregations (array of strings), group_by (array of strings), order_by (array \
of strings), limit (integer or null), expected_output (string), grain (string), \
confidence (one of \"high\", \"medium\", \"low\"), risks (array of strings).";

pub async fn run<K: RemoteKv, C: CheckpointStore>(rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.generate_hypothesis", query_id = %state.query_id);
    let _enter = span.enter();

    state.push_thinking_step("generate_hypothesis", "Drafting a query plan");

    let schema_summary = state
        .context
        .as_ref()
        .map(summarize_schema)
        .unwrap_or_else(|| "(no schema context available)".to_string());

    let user_content = format!(
        "User question: {}\n\nAvailable schema:\n{}",
        state.user_query, schema_summary
    );

    let messages = vec![
        ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
        ChatMessage { role: "user".to_string(), content: user_content },
    ];

    let hypothesis = match rt
        .llm
        .invoke(&messages, &rt.config.llm_provider, rt.config.llm_enable_fallback)
        .await
    {
        Ok((response, _provider)) => parse_hypothesis(&response.content)
            .unwrap_or_else(|| degrade_to_text(&response.content)),
        Err(err) => degrade_to_text(&format!("LLM unavailable: {err:?}")),
    };

    state.push_thinking_step(
        "generate_hypothesis",
        format!(
            "Plan confidence={} degraded={}",
            hypothesis.confidence, hypothesis.degraded_to_text
        ),
    );
    state.hypothesis = Some(hypothesis);
    state.next_action = "generate_sql".to_string();
}

fn summarize_schema(snapshot: &qsql_schemas::SchemaSnapshot) -> String {
    snapshot
        .tables
        .iter()
        .map(|(table, columns)| {
            let column_list = columns
                .iter()
                .map(|c| format!("{} ({})", c.name, c.data_type))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{table}: {column_list}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_hypothesis(text: &str) -> Option<Hypothesis> {
    let json_str = extract_json_object(text)?;
    let value: serde_json::Value = serde_json::from_str(json_str).ok()?;

    let main_table = value.get("main_table")?.as_str()?.to_string();
    let confidence = value.get("confidence")?.as_str()?.to_string();
    if !HYPOTHESIS_CONFIDENCE.contains(&confidence.as_str()) {
        return None;
    }
    let expected_output = value.get("expected_output")?.as_str()?.to_string();
    let grain = value.get("grain")?.as_str()?.to_string();

    let string_list = |key: &str| -> Vec<String> {
        value
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default()
    };
    let limit = value.get("limit").and_then(|v| v.as_u64());

    Some(Hypothesis {
        main_table,
        additional_tables: string_list("additional_tables"),
        joins: string_list("joins"),
        filters: string_list("filters"),
        aggregations: string_list("aggregations"),
        group_by: string_list("group_by"),
        order_by: string_list("order_by"),
        limit,
        expected_output,
        grain,
        confidence,
        risks: string_list("risks"),
        degraded_to_text: false,
    })
}

/// Builds a plan from raw LLM prose when strict JSON extraction fails,
/// carrying the prose forward as `expected_output` so `generate_sql` still
/// has something to work from.
fn degrade_to_text(raw_text: &str) -> Hypothesis {
    Hypothesis {
        main_table: String::new(),
        additional_tables: Vec::new(),
        joins: Vec::new(),
        filters: Vec::new(),
        aggregations: Vec::new(),
        group_by: Vec::new(),
        order_by: Vec::new(),
        limit: None,
        expected_output: raw_text.trim().to_string(),
        grain: "unknown".to_string(),
        confidence: "low".to_string(),
        risks: vec!["hypothesis degraded to plain text".to_string()],
        degraded_to_text: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hypothesis_accepts_well_formed_json() {
        let text = r#"{"main_table": "ORDERS", "additional_tables": ["CUSTOMERS"],
        "joins": ["ORDERS.customer_id = CUSTOMERS.id"], "filters": [], "aggregations":
        ["sum(amount)"], "group_by": ["region"], "order_by": [], "limit": 100,
        "expected_output": "revenue by region", "grain": "region",
        "confidence": "high", "risks": []}"#;
        let hyp = parse_hypothesis(text).unwrap();
        assert_eq!(hyp.main_table, "ORDERS");
        assert_eq!(hyp.confidence, "high");
        assert!(!hyp.degraded_to_text);
    }

    #[test]
    fn parse_hypothesis_rejects_unknown_confidence() {
        let text = r#"{"main_table": "ORDERS", "additional_tables": [], "joins": [],
        "filters": [], "aggregations": [], "group_by": [], "order_by": [], "limit": null,
        "expected_output": "x", "grain": "row", "confidence": "certain", "risks": []}"#;
        assert!(parse_hypothesis(text).is_none());
    }

    #[test]
    fn degrade_to_text_never_fails() {
        let hyp = degrade_to_text("just some prose, no JSON here");
        assert!(hyp.degraded_to_text);
        assert_eq!(hyp.confidence, "low");
    }
}
