//! The query lifecycle state machine, spec §4.7.
//!
//! Modeled as a plain enum plus a transition table rather than a mutable
//! graph — see spec §9 "Cyclic node graph" design note: there are no true
//! cycles, only bounded per-node retries, so a `stage -> next stage` lookup
//! is enough.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryLifecycleState {
    Received,
    Planning,
    Prepared,
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Finished,
    Error,
}

impl QueryLifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            QueryLifecycleState::Finished
                | QueryLifecycleState::Error
                | QueryLifecycleState::Rejected
        )
    }

    /// Allowed next states from this state (the DAG edges from spec §4.7).
    pub fn allowed_next(&self) -> &'static [QueryLifecycleState] {
        use QueryLifecycleState::*;
        match self {
            Received => &[Planning, Error],
            Planning => &[Prepared, Error],
            Prepared => &[PendingApproval, Executing, Error],
            PendingApproval => &[Approved, Rejected, Error],
            Approved => &[Executing, Error],
            Rejected => &[],
            Executing => &[Finished, Error],
            Finished => &[],
            Error => &[],
        }
    }

    pub fn can_transition_to(&self, next: QueryLifecycleState) -> bool {
        self.allowed_next().contains(&next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use QueryLifecycleState::*;

    #[test]
    fn happy_path_is_valid() {
        let path = [Received, Planning, Prepared, Executing, Finished];
        for w in path.windows(2) {
            assert!(w[0].can_transition_to(w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn approval_branch_is_valid() {
        let path = [Received, Planning, Prepared, PendingApproval, Approved, Executing, Finished];
        for w in path.windows(2) {
            assert!(w[0].can_transition_to(w[1]), "{:?} -> {:?}", w[0], w[1]);
        }
    }

    #[test]
    fn terminal_states_have_no_outgoing_edges() {
        for s in [Finished, Error, Rejected] {
            assert!(s.allowed_next().is_empty());
            assert!(s.is_terminal());
        }
    }

    #[test]
    fn cannot_skip_approval_into_approved_without_pending() {
        assert!(!Prepared.can_transition_to(Approved));
    }
}
