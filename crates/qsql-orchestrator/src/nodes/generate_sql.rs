//! Node 4: `generate_sql`, spec §4.10.
//!
//! Turns the hypothesis plan and schema context into a concrete SQL
//! statement via the LLM gateway, then heuristically scores how much the
//! orchestrator should trust it (`sql_confidence`) before handing off to
//! `validate`.

use qsql_llm::ChatMessage;
use qsql_resilient_client::RemoteKv;
use qsql_schemas::QueryState;

use crate::checkpoint::CheckpointStore;
use crate::nodes::extract_sql;
use crate::runtime::Runtime;

const SYSTEM_PROMPT: &str = "You are a SQL generation assistant. Given a query plan and \
the available schema, write a single read-only SQL SELECT statement that fulfills the \
plan. Respond with ONLY the SQL statement, optionally wrapped in a ```sql code fence. \
Do not include any explanation.";

pub async fn run<K: RemoteKv, C: CheckpointStore>(rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.generate_sql", query_id = %state.query_id);
    let _enter = span.enter();

    state.push_thinking_step("generate_sql", "Generating SQL from the query plan");

    let hypothesis_summary = state
        .hypothesis
        .as_ref()
        .map(describe_hypothesis)
        .unwrap_or_else(|| "(no query plan available)".to_string());

    let user_content = format!(
        "User question: {}\n\nQuery plan:\n{}",
        state.user_query, hypothesis_summary
    );

    let messages = vec![
        ChatMessage { role: "system".to_string(), content: SYSTEM_PROMPT.to_string() },
        ChatMessage { role: "user".to_string(), content: user_content },
    ];

    match rt
        .llm
        .invoke(&messages, &rt.config.llm_provider, rt.config.llm_enable_fallback)
        .await
    {
        Ok((response, _provider)) => {
            let sql = extract_sql(&response.content);
            if sql.is_empty() {
                state.error = Some("LLM returned an empty SQL statement".to_string());
                state.next_action = "error".to_string();
                return;
            }
            let confidence = score_confidence(state);
            state.push_thinking_step(
                "generate_sql",
                format!("Generated SQL with confidence {confidence}"),
            );
            state.sql_query = Some(sql);
            state.sql_confidence = Some(confidence);
            state.next_action = "validate".to_string();
        }
        Err(err) => {
            state.error = Some(format!("SQL generation failed: {err:?}"));
            state.next_action = "error".to_string();
        }
    }
}

fn describe_hypothesis(hypothesis: &qsql_schemas::Hypothesis) -> String {
    if hypothesis.degraded_to_text {
        return hypothesis.expected_output.clone();
    }
    format!(
        "main_table={}, additional_tables={:?}, joins={:?}, filters={:?}, \
         aggregations={:?}, group_by={:?}, order_by={:?}, limit={:?}, grain={}",
        hypothesis.main_table,
        hypothesis.additional_tables,
        hypothesis.joins,
        hypothesis.filters,
        hypothesis.aggregations,
        hypothesis.group_by,
        hypothesis.order_by,
        hypothesis.limit,
        hypothesis.grain,
    )
}

/// Heuristic confidence score in `[0, 100]`: high when the hypothesis was
/// itself high-confidence and every table it names is present in the
/// resolved schema context; degraded otherwise. Mirrors the original's
/// `sql_confidence` field feeding the execution node's repair-vs-error
/// decision (spec §4.10 generate_sql / §4.11 execute).
fn score_confidence(state: &QueryState) -> u8 {
    let known_tables: Vec<String> = state
        .context
        .as_ref()
        .map(|ctx| ctx.tables.keys().map(|k| k.to_lowercase()).collect())
        .unwrap_or_default();

    let hypothesis = match &state.hypothesis {
        Some(h) => h,
        None => return 40,
    };
    if hypothesis.degraded_to_text {
        return 40;
    }

    let mut referenced = hypothesis.additional_tables.clone();
    if !hypothesis.main_table.is_empty() {
        referenced.push(hypothesis.main_table.clone());
    }
    let all_known = !referenced.is_empty()
        && referenced
            .iter()
            .all(|t| known_tables.contains(&t.to_lowercase()));

    match (hypothesis.confidence.as_str(), all_known) {
        ("high", true) => 90,
        (_, true) => 70,
        _ => 40,
    }
}
