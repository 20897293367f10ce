//! qsql-approval — approval store and session binding (spec C8 / §4.8).

pub mod binding;
pub mod store;

pub use binding::{validate_approval, IpTolerance, SecurityEventKind};
pub use store::{ApprovalDecision, ApprovalError, ApprovalStore, MarkApprovedOutcome};
