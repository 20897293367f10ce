//! Convenience constructors for `QueryState`, so scenario tests don't each
//! hand-roll the same five positional arguments.

use qsql_schemas::{DatabaseType, QueryState, Role};

/// A freshly-submitted query for `user-1`/`session-1` against Oracle as an
/// analyst. Covers the common case; use `QueryState::new` directly when a
/// test needs a different role or backend.
pub fn new_query_state(user_query: impl Into<String>) -> QueryState {
    QueryState::new("user-1", "session-1", user_query, DatabaseType::Oracle, Role::Analyst)
}

pub fn new_query_state_as(
    user_id: impl Into<String>,
    session_id: impl Into<String>,
    user_query: impl Into<String>,
    database_type: DatabaseType,
    role: Role,
) -> QueryState {
    QueryState::new(user_id, session_id, user_query, database_type, role)
}
