//! Roles, database backends and the risk vocabulary shared across crates.

use serde::{Deserialize, Serialize};

/// Backend a query is destined for. Drives dialect selection (C6) and
/// routing (C15).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Oracle,
    Doris,
    Postgres,
}

impl DatabaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatabaseType::Oracle => "oracle",
            DatabaseType::Doris => "doris",
            DatabaseType::Postgres => "postgres",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The five ordered roles from spec §4.12: GUEST < VIEWER < ANALYST <
/// DEVELOPER < ADMIN.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Guest,
    Viewer,
    Analyst,
    Developer,
    Admin,
}

impl Role {
    pub fn rank(&self) -> u8 {
        match self {
            Role::Guest => 0,
            Role::Viewer => 1,
            Role::Analyst => 2,
            Role::Developer => 3,
            Role::Admin => 4,
        }
    }
}

/// Risk level computed by the validator (C6) for a candidate SQL statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

/// Per-role limits, spec §4.12. `0` denotes "unlimited" for numeric fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleLimits {
    pub role: Role,
    pub max_rows: u64,
    pub daily_query_quota: u64,
    pub daily_cost_quota: u64,
    pub allowed_operations: Vec<String>,
    pub can_export: bool,
    pub max_tables: u32,
    pub max_joins: u32,
    /// Risk levels this role may bypass mandatory approval for (spec §4.6
    /// "role-based bypass").
    pub allowed_risks: Vec<RiskLevel>,
}

impl RoleLimits {
    pub fn allows_risk_without_approval(&self, risk: RiskLevel) -> bool {
        self.allowed_risks.contains(&risk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_ordering_matches_spec() {
        assert!(Role::Guest < Role::Viewer);
        assert!(Role::Viewer < Role::Analyst);
        assert!(Role::Analyst < Role::Developer);
        assert!(Role::Developer < Role::Admin);
    }

    #[test]
    fn risk_ordering_is_monotonic() {
        assert!(RiskLevel::Safe < RiskLevel::Low);
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }
}
