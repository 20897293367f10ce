//! Orchestrator node functions (spec C10 / §4.10).
//!
//! Each node is a pure async function `State -> State`: it mutates its own
//! named slice of [`qsql_schemas::QueryState`], appends to `messages` and
//! `llm_metadata.thinking_steps`, and sets `next_action` for the driver
//! (C11) to dispatch next. Errors set the terminal `error` field and
//! `next_action = "error"` rather than returning a `Result` — the driver,
//! not the node, decides whether an error is retried or terminal.

pub mod execute;
pub mod format;
pub mod generate_hypothesis;
pub mod generate_sql;
pub mod retrieve_context;
pub mod understand;
pub mod validate;

pub(crate) const EXTRA_IP_ADDRESS: &str = "ip_address";
pub(crate) const EXTRA_USER_AGENT: &str = "user_agent";
pub(crate) const EXTRA_LAST_ERROR_RETRYABLE: &str = "last_error_retryable";
pub(crate) const EXTRA_LAST_ERROR_CATEGORY: &str = "last_error_category";

/// Extracts the first balanced-looking `{...}` span from LLM output,
/// grounded on `understand.py`'s `_extract_json_object` (a DOTALL regex
/// match of `\{.*\}`, i.e. first `{` to last `}`).
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    Some(&text[start..=end])
}

/// Strips a leading/trailing Markdown code fence (` ```sql ... ``` ` or
/// plain ` ``` `) from LLM SQL output, then trims whitespace and a trailing
/// semicolon.
pub(crate) fn extract_sql(text: &str) -> String {
    let trimmed = text.trim();
    let without_fence = trimmed
        .strip_prefix("```sql")
        .or_else(|| trimmed.strip_prefix("```SQL"))
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let without_fence = without_fence.strip_suffix("```").unwrap_or(without_fence);
    without_fence.trim().trim_end_matches(';').trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_json_object_finds_outer_braces() {
        let text = "Here is the result:\n{\"a\": 1, \"b\": {\"c\": 2}}\nThanks.";
        assert_eq!(
            extract_json_object(text),
            Some("{\"a\": 1, \"b\": {\"c\": 2}}")
        );
    }

    #[test]
    fn extract_json_object_none_without_braces() {
        assert_eq!(extract_json_object("no json here"), None);
    }

    #[test]
    fn extract_sql_strips_fence() {
        assert_eq!(
            extract_sql("```sql\nSELECT 1;\n```"),
            "SELECT 1".to_string()
        );
    }

    #[test]
    fn extract_sql_passes_through_bare_sql() {
        assert_eq!(extract_sql("SELECT 1"), "SELECT 1".to_string());
    }
}
