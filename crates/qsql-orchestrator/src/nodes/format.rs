//! Node 7: `format`, spec §4.10.
//!
//! Terminal success node: turns the raw `ExecutionResult` into the
//! user-facing `FormattedResult`, flagging a couple of cheap, obviously
//! useful discoveries along the way (spec §4.10's "surface discoveries such
//! as an empty result set or an unexpectedly small result").

use qsql_resilient_client::RemoteKv;
use qsql_schemas::{FormattedResult, QueryState};

use crate::checkpoint::CheckpointStore;
use crate::runtime::Runtime;

pub async fn run<K: RemoteKv, C: CheckpointStore>(_rt: &Runtime<K, C>, state: &mut QueryState) {
    let span = tracing::info_span!("node.format", query_id = %state.query_id);
    let _enter = span.enter();

    let execution = match state.execution_result.clone() {
        Some(result) => result,
        None => {
            state.error = Some("format reached with no execution result".to_string());
            state.next_action = "error".to_string();
            return;
        }
    };

    let discoveries = build_discoveries(&execution);
    for discovery in &discoveries {
        state.push_thinking_step("format", discovery.clone());
    }

    state.formatted_result = Some(FormattedResult {
        columns: execution.columns,
        rows: execution.rows,
        row_count: execution.row_count,
        execution_time_ms: execution.execution_time_ms,
        discoveries,
    });
    state.next_action = "done".to_string();
}

fn build_discoveries(result: &qsql_schemas::ExecutionResult) -> Vec<String> {
    let mut discoveries = Vec::new();
    if result.row_count == 0 {
        discoveries.push("The query returned no rows.".to_string());
    } else if result.row_count == 1 {
        discoveries.push("The query returned a single row.".to_string());
    }
    discoveries
}
