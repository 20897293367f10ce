//! Approval store, spec §4.8.
//!
//! Durable (here: process-lifetime, in-memory) store of pending approvals
//! with a 6h TTL and a 24h idempotency-key TTL. Keys are
//! `hash(query_id || current_sql)` so a given (query, SQL) pair is acted on
//! at most once, satisfying spec §8's "at most one successful
//! `mark_approved` per idempotency key" invariant.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use qsql_schemas::{ApprovalBinding, ApprovalStatus, DatabaseType, PendingApproval, RoleLimits};
use qsql_validator::risk::RiskPolicy;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::binding::{self, IpTolerance};

pub const PENDING_TTL_HOURS: i64 = 6;
pub const IDEMPOTENCY_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    NotFound,
    Expired,
    BindingRejected(String),
}

impl std::fmt::Display for ApprovalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApprovalError::NotFound => write!(f, "no pending approval for this query"),
            ApprovalError::Expired => write!(f, "pending approval has expired"),
            ApprovalError::BindingRejected(reason) => write!(f, "session binding rejected: {reason}"),
        }
    }
}

impl std::error::Error for ApprovalError {}

/// Decision metadata recorded on approval; kept separate from
/// `PendingApproval` (the spec's own record shape has no approver/reason/
/// constraints fields) so callers (audit, orchestrator) can persist it
/// without this crate guessing at a shared schema change.
#[derive(Debug, Clone)]
pub struct ApprovalDecision {
    pub query_id: Uuid,
    pub approver: String,
    pub reason: String,
    pub constraints: BTreeMap<String, serde_json::Value>,
    pub decided_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct MarkApprovedOutcome {
    pub duplicate: bool,
    pub approval: Option<PendingApproval>,
    pub decision: Option<ApprovalDecision>,
}

pub struct ApprovalStore {
    pending: RwLock<HashMap<Uuid, PendingApproval>>,
    idempotency_keys: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl Default for ApprovalStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ApprovalStore {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            idempotency_keys: RwLock::new(HashMap::new()),
        }
    }

    pub fn idempotency_key(query_id: Uuid, sql: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(query_id.as_bytes());
        hasher.update(b"\0");
        hasher.update(sql.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Run the validator on `original_sql` and store the resulting
    /// `PendingApproval`.
    pub async fn save_pending(
        &self,
        query_id: Uuid,
        original_sql: &str,
        dialect: DatabaseType,
        policy: &RiskPolicy,
        role: &RoleLimits,
        row_limit: u64,
        approval_binding: ApprovalBinding,
    ) -> PendingApproval {
        let validation = qsql_validator::validate(original_sql, dialect, dialect, policy, role, row_limit);
        let record = PendingApproval {
            query_id,
            created_at: Utc::now(),
            original_sql: original_sql.to_string(),
            modified_sql: None,
            risk_assessment: validation.risk_level,
            approval_status: ApprovalStatus::Pending,
            idempotency_key: Self::idempotency_key(query_id, original_sql),
            binding: approval_binding,
            requires_reapproval: false,
        };
        self.pending.write().await.insert(query_id, record.clone());
        record
    }

    /// Run the validator on `modified_sql`, escalating `requires_reapproval`
    /// when the new risk is strictly higher than the original.
    pub async fn reassess(
        &self,
        query_id: Uuid,
        modified_sql: &str,
        dialect: DatabaseType,
        policy: &RiskPolicy,
        role: &RoleLimits,
        row_limit: u64,
    ) -> Result<PendingApproval, ApprovalError> {
        let validation = qsql_validator::validate(modified_sql, dialect, dialect, policy, role, row_limit);

        let mut guard = self.pending.write().await;
        let record = guard.get_mut(&query_id).ok_or(ApprovalError::NotFound)?;

        let risk_increased = match (record.risk_assessment, validation.risk_level) {
            (Some(old), Some(new)) => new > old,
            (None, Some(_)) => true,
            _ => false,
        };

        record.modified_sql = Some(modified_sql.to_string());
        record.risk_assessment = validation.risk_level;
        if risk_increased {
            record.requires_reapproval = true;
        }
        Ok(record.clone())
    }

    /// Validate session binding, then apply the idempotency check before
    /// recording approval. `duplicate=true` means "refuse silently, already
    /// handled" per spec §4.8.
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_approved(
        &self,
        query_id: Uuid,
        sql: &str,
        approver: &str,
        reason: &str,
        constraints: BTreeMap<String, serde_json::Value>,
        secret: &str,
        approval_time_binding: &ApprovalBinding,
        ip_tolerance: IpTolerance,
    ) -> Result<MarkApprovedOutcome, ApprovalError> {
        {
            let guard = self.pending.read().await;
            let record = guard.get(&query_id).ok_or(ApprovalError::NotFound)?;
            if record.is_expired(ChronoDuration::hours(PENDING_TTL_HOURS), Utc::now()) {
                return Err(ApprovalError::Expired);
            }
            binding::validate_approval(secret, &record.binding, approval_time_binding, ip_tolerance)
                .map_err(|mismatch| ApprovalError::BindingRejected(mismatch.to_string()))?;
        }

        let key = Self::idempotency_key(query_id, sql);
        {
            let mut keys = self.idempotency_keys.write().await;
            evict_expired(&mut keys);
            if keys.contains_key(&key) {
                return Ok(MarkApprovedOutcome {
                    duplicate: true,
                    approval: None,
                    decision: None,
                });
            }
            keys.insert(key, Utc::now());
        }

        let mut guard = self.pending.write().await;
        let record = guard.get_mut(&query_id).ok_or(ApprovalError::NotFound)?;
        record.approval_status = ApprovalStatus::Approved;

        let decision = ApprovalDecision {
            query_id,
            approver: approver.to_string(),
            reason: reason.to_string(),
            constraints,
            decided_at: Utc::now(),
        };

        Ok(MarkApprovedOutcome {
            duplicate: false,
            approval: Some(record.clone()),
            decision: Some(decision),
        })
    }

    /// Validate session binding, then record a rejection. Unlike
    /// `mark_approved`, rejection carries no idempotency key: refusing a
    /// query twice is harmless, there's no side effect to double-apply.
    pub async fn mark_rejected(
        &self,
        query_id: Uuid,
        secret: &str,
        approval_time_binding: &ApprovalBinding,
        ip_tolerance: IpTolerance,
    ) -> Result<PendingApproval, ApprovalError> {
        let mut guard = self.pending.write().await;
        let record = guard.get_mut(&query_id).ok_or(ApprovalError::NotFound)?;
        if record.is_expired(ChronoDuration::hours(PENDING_TTL_HOURS), Utc::now()) {
            return Err(ApprovalError::Expired);
        }
        binding::validate_approval(secret, &record.binding, approval_time_binding, ip_tolerance)
            .map_err(|mismatch| ApprovalError::BindingRejected(mismatch.to_string()))?;

        record.approval_status = ApprovalStatus::Rejected;
        Ok(record.clone())
    }

    pub async fn get(&self, query_id: Uuid) -> Option<PendingApproval> {
        self.pending.read().await.get(&query_id).cloned()
    }
}

fn evict_expired(keys: &mut HashMap<String, DateTime<Utc>>) {
    let cutoff = Utc::now() - ChronoDuration::hours(IDEMPOTENCY_TTL_HOURS);
    keys.retain(|_, at| *at > cutoff);
}
