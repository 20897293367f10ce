//! Risk scoring, spec §4.6.
//!
//! Heuristic, not AST-exhaustive: queries touching configurable
//! sensitive-table/column sets escalate to `high`; a blacklist of dangerous
//! built-in functions escalates to `critical`. Role-based bypass clears
//! `requires_approval` when the role's `allowed_risks` already covers the
//! computed level (spec §4.6 "Role-based bypass", resolving the duplicate
//! definition in the distillation per spec §9 Open Questions — see
//! DESIGN.md).

use qsql_schemas::{Role, RoleLimits};
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

impl From<RiskLevel> for qsql_schemas::RiskLevel {
    fn from(r: RiskLevel) -> Self {
        match r {
            RiskLevel::Safe => qsql_schemas::RiskLevel::Safe,
            RiskLevel::Low => qsql_schemas::RiskLevel::Low,
            RiskLevel::Medium => qsql_schemas::RiskLevel::Medium,
            RiskLevel::High => qsql_schemas::RiskLevel::High,
            RiskLevel::Critical => qsql_schemas::RiskLevel::Critical,
        }
    }
}

/// Configurable policy for risk scoring: sensitive table/column name sets
/// and the dangerous-function blacklist, plus the threshold at which
/// approval is mandatory absent a role bypass.
#[derive(Debug, Clone)]
pub struct RiskPolicy {
    pub sensitive_tables: Vec<String>,
    pub sensitive_columns: Vec<String>,
    pub dangerous_functions: Vec<String>,
    pub approval_threshold: RiskLevel,
}

impl Default for RiskPolicy {
    fn default() -> Self {
        Self {
            sensitive_tables: vec![
                "SALARIES".to_string(),
                "EMPLOYEES".to_string(),
                "PAYROLL".to_string(),
                "SSN".to_string(),
                "CREDIT_CARDS".to_string(),
            ],
            sensitive_columns: vec![
                "SSN".to_string(),
                "PASSWORD".to_string(),
                "PASSWORD_HASH".to_string(),
                "CREDIT_CARD_NUMBER".to_string(),
                "SALARY".to_string(),
            ],
            dangerous_functions: vec![
                "UTL_HTTP".to_string(),
                "UTL_FILE".to_string(),
                "UTL_SMTP".to_string(),
                "XP_CMDSHELL".to_string(),
                "PG_READ_FILE".to_string(),
                "PG_WRITE_FILE".to_string(),
                "LOAD_FILE".to_string(),
                "SYS_EVAL".to_string(),
                "SYS_EXEC".to_string(),
            ],
            approval_threshold: RiskLevel::High,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Score `sql` against `policy`, then apply `role`'s bypass if the computed
/// level is in `role.allowed_risks`.
pub fn assess(sql: &str, policy: &RiskPolicy, role: &RoleLimits) -> RiskAssessment {
    let upper = sql.to_uppercase();
    let mut level = RiskLevel::Safe;
    let mut warnings = Vec::new();
    let errors = Vec::new();

    for table in &policy.sensitive_tables {
        if contains_identifier(&upper, table) {
            warnings.push(format!("query references sensitive table {table}"));
            level = level.max(RiskLevel::High);
        }
    }
    for column in &policy.sensitive_columns {
        if contains_identifier(&upper, column) {
            warnings.push(format!("query references sensitive column {column}"));
            level = level.max(RiskLevel::High);
        }
    }
    for func in &policy.dangerous_functions {
        if contains_identifier(&upper, func) {
            warnings.push(format!("query invokes dangerous function {func}"));
            level = level.max(RiskLevel::Critical);
        }
    }

    if level == RiskLevel::Safe {
        // Mild heuristics for the low/medium band: wide scans and
        // unconstrained selects are marginally riskier than a filtered one.
        if upper.contains("SELECT *") {
            level = level.max(RiskLevel::Low);
        }
        if !upper.contains("WHERE") && upper.trim_start().starts_with("SELECT") {
            level = level.max(RiskLevel::Medium);
            warnings.push("query has no WHERE clause".to_string());
        }
    }

    let mut requires_approval = level >= policy.approval_threshold;
    let bypass_risk: qsql_schemas::RiskLevel = level.into();
    if role.allows_risk_without_approval(bypass_risk) {
        requires_approval = false;
    }

    RiskAssessment {
        risk_level: level,
        requires_approval,
        errors,
        warnings,
    }
}

/// True if `needle` appears in `haystack` as a whole identifier (not as a
/// substring of a longer word), matching spec's table/column name
/// configuration semantics.
fn contains_identifier(haystack: &str, needle: &str) -> bool {
    let needle = needle.to_uppercase();
    let pattern = format!(r"\b{}\b", regex::escape(&needle));
    Regex::new(&pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_role_limits(role: Role) -> RoleLimits {
        RoleLimits {
            role,
            max_rows: 0,
            daily_query_quota: 0,
            daily_cost_quota: 0,
            allowed_operations: vec![],
            can_export: false,
            max_tables: 0,
            max_joins: 0,
            allowed_risks: vec![],
        }
    }

    #[test]
    fn sensitive_table_is_high_risk() {
        let policy = RiskPolicy::default();
        let role = default_role_limits(Role::Analyst);
        let a = assess("SELECT * FROM SALARIES", &policy, &role);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert!(a.requires_approval);
    }

    #[test]
    fn dangerous_function_is_critical() {
        let policy = RiskPolicy::default();
        let role = default_role_limits(Role::Analyst);
        let a = assess("SELECT UTL_HTTP.REQUEST('x') FROM DUAL", &policy, &role);
        assert_eq!(a.risk_level, RiskLevel::Critical);
        assert!(a.requires_approval);
    }

    #[test]
    fn role_bypass_clears_approval_requirement() {
        let policy = RiskPolicy::default();
        let mut role = default_role_limits(Role::Admin);
        role.allowed_risks = vec![qsql_schemas::RiskLevel::High, qsql_schemas::RiskLevel::Critical];
        let a = assess("SELECT * FROM SALARIES", &policy, &role);
        assert_eq!(a.risk_level, RiskLevel::High);
        assert!(!a.requires_approval, "admin role bypasses HIGH risk approval");
    }

    #[test]
    fn plain_filtered_select_is_safe() {
        let policy = RiskPolicy::default();
        let role = default_role_limits(Role::Viewer);
        let a = assess("SELECT id FROM customers WHERE id = 1", &policy, &role);
        assert_eq!(a.risk_level, RiskLevel::Safe);
        assert!(!a.requires_approval);
    }

    #[test]
    fn substring_of_identifier_does_not_false_positive() {
        // "SALARIES_ARCHIVE" must not trip the "SALARIES" sensitive-table rule.
        let policy = RiskPolicy::default();
        let role = default_role_limits(Role::Analyst);
        let a = assess("SELECT id FROM SALARIES_ARCHIVE WHERE id = 1", &policy, &role);
        assert_eq!(a.risk_level, RiskLevel::Safe);
    }
}
