//! `PooledProcess` record, spec §3/§4.4.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PooledProcessState {
    Idle,
    Busy,
    Failed,
    Initializing,
    Shutdown,
}

/// Read-only view of a pooled process's bookkeeping fields, exposed by the
/// pool manager (C4) for health reporting. The process handle itself (the
/// actual DB client) is never exposed outside `qsql-pool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PooledProcessView {
    pub id: Uuid,
    pub state: PooledProcessState,
    pub queries_executed: u64,
    pub errors: u32,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
}
