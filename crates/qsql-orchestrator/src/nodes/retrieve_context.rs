//! Node 2: `retrieve_context`, spec §4.10.
//!
//! Resolves the schema for the tables identified by `understand` (or, if the
//! taxonomy didn't name any, re-extracts them heuristically from the raw
//! query text via [`qsql_schema::extract_table_names`]).

use qsql_resilient_client::RemoteKv;
use qsql_schemas::QueryState;

use crate::checkpoint::CheckpointStore;
use crate::runtime::Runtime;

pub async fn run<K: RemoteKv, C: CheckpointStore>(rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.retrieve_context", query_id = %state.query_id);
    let _enter = span.enter();

    state.push_thinking_step("retrieve_context", "Resolving schema for referenced tables");

    let tables: Vec<String> = match &state.intent {
        Some(intent) if !intent.tables.is_empty() => intent.tables.clone(),
        _ => qsql_schema::extract_table_names(&state.user_query),
    };

    if tables.is_empty() {
        state.push_thinking_step(
            "retrieve_context",
            "No candidate tables identified, proceeding with empty schema context",
        );
        state.context = Some(qsql_schemas::SchemaSnapshot::default());
        state.next_action = "generate_hypothesis".to_string();
        return;
    }

    match rt.schema_resolver.resolve(state.database_type, &tables).await {
        Ok(snapshot) => {
            state.push_thinking_step(
                "retrieve_context",
                format!("Resolved schema for {} table(s)", snapshot.tables.len()),
            );
            state.context = Some(snapshot);
            state.next_action = "generate_hypothesis".to_string();
        }
        Err(err) => {
            state.error = Some(format!("schema resolution failed: {err}"));
            state.next_action = "error".to_string();
        }
    }
}
