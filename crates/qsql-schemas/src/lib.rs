//! qsql-schemas — shared data model for the query orchestrator workspace.
//!
//! Every crate in this workspace that needs to talk about a `QueryState`, a
//! `Role`, a `NormalizedError`, or any of the other record types in spec §3
//! depends on this crate rather than redefining the shape locally. Mirrors
//! the role `mqk-schemas` plays for the teacher workspace.

pub mod approval;
pub mod component;
pub mod error;
pub mod event;
pub mod lifecycle;
pub mod pool;
pub mod query_state;
pub mod role;

pub use approval::{ApprovalBinding, ApprovalStatus, PendingApproval};
pub use component::{ComponentState, ComponentStatus, DegradationLevel};
pub use error::{ErrorCategory, NormalizedError, RetryStrategy as ErrorRetryStrategy};
pub use event::QueryStateEvent;
pub use lifecycle::QueryLifecycleState;
pub use pool::{PooledProcessState, PooledProcessView};
pub use query_state::{
    ColumnMapping, ExecutionResult, FormattedResult, Hypothesis, Intent, Message, QueryState,
    SchemaSnapshot, ThinkingStep, ValidationResult,
};
pub use role::{DatabaseType, Role, RoleLimits, RiskLevel};
