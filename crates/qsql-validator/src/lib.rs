//! qsql-validator — SQL validation (spec C6 / §4.6).
//!
//! Four independent concerns composed by [`validate`]: read-only
//! enforcement (AST-based), risk scoring (heuristic), dialect conversion
//! (data-driven, idempotent) and sandbox wrapping (row-cap, never loosened).

pub mod dialect;
pub mod readonly;
pub mod risk;
pub mod sandbox;

use qsql_schemas::{DatabaseType, RoleLimits, ValidationResult};
use readonly::ReadOnlyViolation;
use risk::RiskPolicy;

/// Full validation pipeline for one candidate SQL statement, producing the
/// `ValidationResult` carried on `QueryState` (spec §3/§4.6).
///
/// `source_dialect` is the dialect the SQL was authored in (typically the
/// connection's native dialect); `target_dialect` is where it will actually
/// run. When they differ the SQL is converted before risk scoring and
/// sandboxing, since sensitive-table/function names and row-cap syntax are
/// dialect-specific.
pub fn validate(
    sql: &str,
    source_dialect: DatabaseType,
    target_dialect: DatabaseType,
    policy: &RiskPolicy,
    role: &RoleLimits,
    row_limit: u64,
) -> ValidationResult {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if let Err(violation) = readonly::enforce_read_only(sql) {
        errors.push(violation.to_string());
        return ValidationResult {
            risk_level: None,
            requires_approval: false,
            errors,
            warnings,
            sandboxed_sql: None,
        };
    }

    let converted = dialect::convert(sql, source_dialect, target_dialect);

    let safety = sandbox::validate_safety(&converted);
    if !safety.is_safe() {
        errors.extend(safety.violations);
    }

    let assessment = risk::assess(&converted, policy, role);
    warnings.extend(assessment.warnings);
    errors.extend(assessment.errors);

    let sandboxed_sql = if errors.is_empty() {
        Some(sandbox::wrap_with_sandbox(&converted, row_limit, target_dialect))
    } else {
        None
    };

    ValidationResult {
        risk_level: Some(assessment.risk_level.into()),
        requires_approval: assessment.requires_approval,
        errors,
        warnings,
        sandboxed_sql,
    }
}

/// Convenience wrapper returning the parse error directly, used by callers
/// (e.g. the orchestrator's `validate_sql` node) that want to branch on the
/// specific violation before falling back to a generic validation failure.
pub fn enforce_read_only(sql: &str) -> Result<(), ReadOnlyViolation> {
    readonly::enforce_read_only(sql).map(|_| ())
}
