//! Sandbox wrapping, spec §4.6, grounded on
//! `original_source/backend/app/services/query_sandbox.py`'s
//! `wrap_with_sandbox`/`validate_safety`.
//!
//! Idempotence rule (spec §8): wrapping a query that already carries a
//! smaller or equal row cap than `row_limit` must not loosen it. Only a
//! larger existing cap gets tightened down to `row_limit`.

use qsql_schemas::DatabaseType;
use regex::Regex;

pub const DEFAULT_ROW_LIMIT: u64 = 1000;

const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "drop", "truncate", "create", "alter",
    "grant", "revoke", "commit", "rollback", "exec", "execute", "call",
    "merge", "upsert",
];

const DANGEROUS_FUNCTIONS: &[&str] = &[
    "sys_eval",
    "sys_exec",
    "xp_cmdshell",
    "pg_read_file",
    "pg_write_file",
    "load_file",
    "into outfile",
    "bcp",
    "bulk insert",
    "utl_http",
    "utl_file",
    "utl_smtp",
];

/// Wrap `sql` with a row cap appropriate to `dialect`, tightening any
/// existing cap down to `row_limit` but never loosening one already
/// smaller.
pub fn wrap_with_sandbox(sql: &str, row_limit: u64, dialect: DatabaseType) -> String {
    match dialect {
        DatabaseType::Oracle => apply_oracle_limit(sql, row_limit),
        DatabaseType::Doris | DatabaseType::Postgres => apply_limit_clause(sql, row_limit),
    }
}

fn apply_oracle_limit(sql: &str, limit: u64) -> String {
    let upper = sql.to_uppercase();
    let trimmed = sql.trim();

    if upper.contains("ROWNUM") {
        return format!("SELECT * FROM (\n{trimmed}\n) WHERE ROWNUM <= {limit}");
    }

    if upper.contains("FETCH FIRST") {
        if let Ok(re) = Regex::new(r"(?i)FETCH\s+FIRST\s+(\d+)") {
            if let Some(caps) = re.captures(&upper) {
                if let Ok(current) = caps[1].parse::<u64>() {
                    if current > limit {
                        return re
                            .replace(sql, format!("FETCH FIRST {limit}").as_str())
                            .into_owned();
                    }
                }
            }
            return sql.to_string();
        }
    }

    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    format!("SELECT * FROM (\n{body}\n) WHERE ROWNUM <= {limit}")
}

fn apply_limit_clause(sql: &str, limit: u64) -> String {
    let upper = sql.to_uppercase();

    if upper.contains("LIMIT") {
        if let Ok(re) = Regex::new(r"(?i)\bLIMIT\s+(\d+)\b") {
            if let Some(caps) = re.captures(&upper) {
                if let Ok(current) = caps[1].parse::<u64>() {
                    if current > limit {
                        return re
                            .replace(sql, format!("LIMIT {limit}").as_str())
                            .into_owned();
                    }
                }
            }
            return sql.to_string();
        }
    }

    let trimmed = sql.trim();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    format!("{body} LIMIT {limit}")
}

#[derive(Debug, Clone, Default)]
pub struct SafetyViolations {
    pub violations: Vec<String>,
}

impl SafetyViolations {
    pub fn is_safe(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Keyword/function blacklist and stacked-statement check, independent of
/// (and a defense-in-depth complement to) [`crate::readonly::enforce_read_only`].
pub fn validate_safety(sql: &str) -> SafetyViolations {
    let upper = sql.to_uppercase();
    let mut violations = Vec::new();

    for keyword in FORBIDDEN_KEYWORDS {
        let pattern = format!(r"(?i)\b{}\b", regex::escape(keyword));
        if Regex::new(&pattern).map(|re| re.is_match(sql)).unwrap_or(false) {
            violations.push(format!("forbidden operation: {}", keyword.to_uppercase()));
        }
    }

    let collapsed: String = upper.chars().filter(|c| !c.is_whitespace()).collect();
    for func in DANGEROUS_FUNCTIONS {
        let needle: String = func.to_uppercase().chars().filter(|c| !c.is_whitespace()).collect();
        if collapsed.contains(&needle) {
            violations.push(format!("dangerous function: {func}"));
        }
    }

    let statement_count = sql.matches(';').count() + 1;
    if statement_count > 1 {
        violations.push("multiple statements not allowed in sandbox".to_string());
    }

    SafetyViolations { violations }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oracle_wrap_adds_rownum_bound() {
        let wrapped = wrap_with_sandbox("SELECT * FROM t", 500, DatabaseType::Oracle);
        assert!(wrapped.contains("ROWNUM <= 500"));
    }

    #[test]
    fn doris_wrap_adds_limit_clause() {
        let wrapped = wrap_with_sandbox("SELECT * FROM t", 500, DatabaseType::Doris);
        assert!(wrapped.contains("LIMIT 500"));
    }

    #[test]
    fn existing_smaller_limit_is_not_loosened() {
        let wrapped = wrap_with_sandbox("SELECT * FROM t LIMIT 10", 500, DatabaseType::Doris);
        assert_eq!(wrapped, "SELECT * FROM t LIMIT 10");
    }

    #[test]
    fn existing_larger_limit_is_tightened() {
        let wrapped = wrap_with_sandbox("SELECT * FROM t LIMIT 5000", 500, DatabaseType::Doris);
        assert!(wrapped.contains("LIMIT 500"));
        assert!(!wrapped.contains("5000"));
    }

    #[test]
    fn wrapping_is_idempotent_once_tightened() {
        let once = wrap_with_sandbox("SELECT * FROM t LIMIT 5000", 500, DatabaseType::Doris);
        let twice = wrap_with_sandbox(&once, 500, DatabaseType::Doris);
        assert_eq!(once, twice);
    }

    #[test]
    fn forbidden_keyword_is_flagged() {
        let v = validate_safety("DELETE FROM customers");
        assert!(!v.is_safe());
        assert!(v.violations.iter().any(|m| m.contains("DELETE")));
    }

    #[test]
    fn dangerous_function_is_flagged_regardless_of_spacing() {
        let v = validate_safety("SELECT * FROM t INTO OUTFILE '/tmp/x'");
        assert!(!v.is_safe());
    }

    #[test]
    fn plain_select_is_safe() {
        let v = validate_safety("SELECT id FROM customers WHERE id = 1");
        assert!(v.is_safe());
    }

    #[test]
    fn stacked_statements_are_flagged() {
        let v = validate_safety("SELECT 1; SELECT 2;");
        assert!(!v.is_safe());
    }
}
