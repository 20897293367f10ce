//! Table-name extraction heuristic, spec §4.9.
//!
//! Grounded on `original_source/backend/app/services/doris_schema_service.py`'s
//! `_extract_table_name`: regex matches against `FROM x`, `JOIN x`, and
//! `IN x TABLE` shapes, plus a fallback scan for bare uppercase identifiers
//! that look like table names, filtered against a SQL keyword stoplist.

use std::collections::HashSet;

use regex::Regex;

const STOPWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "GROUP", "ORDER", "HAVING", "LIMIT", "OFFSET",
    "JOIN", "INNER", "OUTER", "LEFT", "RIGHT", "FULL", "CROSS", "ON", "AND",
    "OR", "NOT", "NULL", "DISTINCT", "UNION", "ALL", "AS", "BY", "WITH",
    "CASE", "WHEN", "THEN", "ELSE", "END", "IN", "EXISTS", "BETWEEN", "LIKE",
    "ASC", "DESC", "COUNT", "SUM", "AVG", "MIN", "MAX", "INTO", "VALUES",
    "TABLE", "FETCH", "FIRST", "ROWS", "ONLY", "ROWNUM", "DUAL",
];

/// Extract candidate table names referenced by `sql`. Best-effort: callers
/// treat the result as a set of hints to resolve against a schema source,
/// not as a guarantee of completeness or correctness.
pub fn extract_table_names(sql: &str) -> Vec<String> {
    let mut found = HashSet::new();

    if let Ok(re) = Regex::new(r"(?i)\bfrom\s+([a-zA-Z_][a-zA-Z0-9_\.]*)") {
        for caps in re.captures_iter(sql) {
            push_candidate(&mut found, &caps[1]);
        }
    }
    if let Ok(re) = Regex::new(r"(?i)\bjoin\s+([a-zA-Z_][a-zA-Z0-9_\.]*)") {
        for caps in re.captures_iter(sql) {
            push_candidate(&mut found, &caps[1]);
        }
    }
    if let Ok(re) = Regex::new(r"(?i)\bin\s+([a-zA-Z_][a-zA-Z0-9_\.]*)\s+table\b") {
        for caps in re.captures_iter(sql) {
            push_candidate(&mut found, &caps[1]);
        }
    }

    // Fallback: bare uppercase-looking identifiers longer than 3 chars,
    // filtered against the keyword stoplist, in case the dialect-specific
    // patterns above missed an unusual clause shape.
    if let Ok(re) = Regex::new(r"\b[A-Z][A-Z0-9_]{3,}\b") {
        for m in re.find_iter(sql) {
            push_candidate(&mut found, m.as_str());
        }
    }

    let mut names: Vec<String> = found.into_iter().collect();
    names.sort();
    names
}

fn push_candidate(set: &mut HashSet<String>, raw: &str) {
    let name = raw.trim_matches(|c: char| c == '"' || c == '`');
    let upper = name.to_uppercase();
    let bare = upper.rsplit('.').next().unwrap_or(&upper);
    if STOPWORDS.contains(&bare) {
        return;
    }
    if bare.len() < 3 {
        return;
    }
    set.insert(upper);
}
