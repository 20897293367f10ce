//! qsql-quota — role-based row/query/cost limits (spec C12 / §4.12).
//!
//! Grounded on `original_source/backend/app/services/role_based_limits_service.py`:
//! the five-role `ROLE_LIMITS` table (row/quota/cost/table/join ceilings,
//! `0` meaning unlimited) is carried over in full, and
//! `check_and_increment_query_quota` / `check_cost_quota` / `track_query_cost`
//! / `apply_row_limit` keep the same key shapes (`quota:daily:<user>:<date>`,
//! `quota:cost:<user>:<date>`) and "fail open with a warning" behavior on
//! store failure, re-expressed against [`qsql_resilient_client::ResilientKv`]
//! instead of a raw Redis client, so a store outage degrades through the
//! same fallback cache C2 already gives every other resilient dependency.

use std::time::Duration;

use chrono::Utc;
use qsql_resilient_client::{RemoteKv, ResilientKv};
use qsql_schemas::{DatabaseType, Role, RoleLimits, RiskLevel};
use tokio::sync::Mutex;
use tracing::warn;

pub const DAILY_TTL: Duration = Duration::from_secs(86_400);

/// Default limits per role, spec §4.12 / original `ROLE_LIMITS` table.
/// `allowed_risks` is this workspace's addition, wiring the role straight
/// into C6's role-based approval bypass (spec §4.6) instead of leaving it
/// for callers to guess a policy.
pub fn default_role_limits(role: Role) -> RoleLimits {
    match role {
        Role::Guest => RoleLimits {
            role,
            max_rows: 50,
            daily_query_quota: 10,
            daily_cost_quota: 1,
            allowed_operations: vec!["SELECT".to_string()],
            can_export: false,
            max_tables: 2,
            max_joins: 1,
            allowed_risks: vec![RiskLevel::Safe],
        },
        Role::Viewer => RoleLimits {
            role,
            max_rows: 100,
            daily_query_quota: 50,
            daily_cost_quota: 5,
            allowed_operations: vec!["SELECT".to_string()],
            can_export: false,
            max_tables: 3,
            max_joins: 2,
            allowed_risks: vec![RiskLevel::Safe, RiskLevel::Low],
        },
        Role::Analyst => RoleLimits {
            role,
            max_rows: 10_000,
            daily_query_quota: 200,
            daily_cost_quota: 50,
            allowed_operations: vec!["SELECT".to_string()],
            can_export: true,
            max_tables: 6,
            max_joins: 5,
            allowed_risks: vec![RiskLevel::Safe, RiskLevel::Low, RiskLevel::Medium],
        },
        Role::Developer => RoleLimits {
            role,
            max_rows: 100_000,
            daily_query_quota: 500,
            daily_cost_quota: 200,
            allowed_operations: vec![
                "SELECT".to_string(),
                "INSERT".to_string(),
                "UPDATE".to_string(),
                "DELETE".to_string(),
            ],
            can_export: true,
            max_tables: 10,
            max_joins: 8,
            allowed_risks: vec![RiskLevel::Safe, RiskLevel::Low, RiskLevel::Medium, RiskLevel::High],
        },
        Role::Admin => RoleLimits {
            role,
            max_rows: 0,
            daily_query_quota: 0,
            daily_cost_quota: 0,
            allowed_operations: vec![
                "SELECT".to_string(),
                "INSERT".to_string(),
                "UPDATE".to_string(),
                "DELETE".to_string(),
                "DROP".to_string(),
                "CREATE".to_string(),
                "ALTER".to_string(),
            ],
            can_export: true,
            max_tables: 0,
            max_joins: 0,
            allowed_risks: vec![
                RiskLevel::Safe,
                RiskLevel::Low,
                RiskLevel::Medium,
                RiskLevel::High,
                RiskLevel::Critical,
            ],
        },
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QuotaDecision {
    Unlimited,
    Allowed { used: u64, limit: u64, remaining: u64 },
    Rejected { used: u64, limit: u64 },
}

impl QuotaDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, QuotaDecision::Rejected { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CostDecision {
    Unlimited,
    Allowed { used_cents: u64, limit_cents: u64, remaining_cents: u64 },
    Rejected { used_cents: u64, limit_cents: u64 },
}

impl CostDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, CostDecision::Rejected { .. })
    }
}

fn today() -> String {
    Utc::now().format("%Y-%m-%d").to_string()
}

/// Per-role row/query/cost quota enforcement, spec §4.12.
///
/// Costs are tracked in integer cents rather than floating dollars (the
/// original's `daily_cost_quota: float`): avoids the "$50.00 vs $49.999999"
/// drift a string-encoded float accumulator would eventually hit in a
/// store round-trip.
pub struct QuotaEnforcer<K: RemoteKv> {
    kv: ResilientKv<K>,
    /// Serializes check-and-increment, mirroring the spec's "atomically"
    /// requirement; `ResilientKv` itself offers get/set but no atomic INCR.
    lock: Mutex<()>,
}

impl<K: RemoteKv> QuotaEnforcer<K> {
    pub fn new(kv: ResilientKv<K>) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    fn query_key(user_id: &str) -> String {
        format!("quota:daily:{user_id}:{}", today())
    }

    fn cost_key(user_id: &str) -> String {
        format!("quota:cost:{user_id}:{}", today())
    }

    /// spec §4.12 `check_and_increment_query_quota`: must not increment on
    /// reject (spec §8 boundary behavior).
    pub async fn check_and_increment_query_quota(
        &self,
        user_id: &str,
        limits: &RoleLimits,
    ) -> QuotaDecision {
        if limits.daily_query_quota == 0 {
            return QuotaDecision::Unlimited;
        }

        let _guard = self.lock.lock().await;
        let key = Self::query_key(user_id);
        let current: u64 = self
            .kv
            .get(&key)
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current >= limits.daily_query_quota {
            return QuotaDecision::Rejected {
                used: current,
                limit: limits.daily_query_quota,
            };
        }

        let new_count = current + 1;
        self.kv.set(&key, &new_count.to_string(), DAILY_TTL).await;
        QuotaDecision::Allowed {
            used: new_count,
            limit: limits.daily_query_quota,
            remaining: limits.daily_query_quota - new_count,
        }
    }

    /// spec §4.12 `check_cost_quota`: read-only check, does not track cost
    /// itself — callers invoke [`Self::track_query_cost`] after execution.
    pub async fn check_cost_quota(
        &self,
        user_id: &str,
        limits: &RoleLimits,
        estimated_cost_cents: u64,
    ) -> CostDecision {
        if limits.daily_cost_quota == 0 {
            return CostDecision::Unlimited;
        }
        let limit_cents = limits.daily_cost_quota.saturating_mul(100);

        let key = Self::cost_key(user_id);
        let current_cents: u64 = self
            .kv
            .get(&key)
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if current_cents + estimated_cost_cents > limit_cents {
            return CostDecision::Rejected {
                used_cents: current_cents,
                limit_cents,
            };
        }

        CostDecision::Allowed {
            used_cents: current_cents,
            limit_cents,
            remaining_cents: limit_cents - current_cents - estimated_cost_cents,
        }
    }

    /// spec §4.12 `track_query_cost`: records actual cost against the
    /// accumulator after execution completes.
    pub async fn track_query_cost(&self, user_id: &str, cost_cents: u64) {
        let key = Self::cost_key(user_id);
        let current: u64 = self
            .kv
            .get(&key)
            .await
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        let updated = current.saturating_add(cost_cents);
        if !self.kv.set(&key, &updated.to_string(), DAILY_TTL).await {
            warn!(user = user_id, "failed to persist tracked query cost to primary store");
        }
    }

    /// spec §4.12 `apply_row_limit`: dialect-appropriate row cap, skipped
    /// when the SQL already carries a limit or the role is unlimited.
    pub fn apply_row_limit(sql: &str, limits: &RoleLimits, dialect: DatabaseType) -> String {
        if limits.max_rows == 0 {
            return sql.to_string();
        }

        let upper = sql.to_uppercase();
        let has_oracle_limit = upper.contains("FETCH FIRST") || upper.contains("ROWNUM");
        let has_other_limit = upper.contains("LIMIT");
        if has_oracle_limit || has_other_limit {
            return sql.to_string();
        }

        let trimmed = sql.trim_end().trim_end_matches(';');
        match dialect {
            DatabaseType::Oracle => format!("{trimmed} FETCH FIRST {} ROWS ONLY", limits.max_rows),
            DatabaseType::Doris | DatabaseType::Postgres => {
                format!("{trimmed} LIMIT {}", limits.max_rows)
            }
        }
    }
}
