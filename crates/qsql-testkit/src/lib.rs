//! qsql-testkit — shared test fixtures and fakes (ambient stack), mirroring
//! the role `mqk-testkit` plays for the teacher workspace: scenario tests
//! across the daemon and orchestrator crates depend on this crate so they
//! don't each hand-roll the same in-memory KV, scripted LLM, and fixed
//! schema source. Kept out of any crate's `[dependencies]` — only
//! `[dev-dependencies]` — so none of this reaches a production build.

pub mod fixtures;
pub mod kv;
pub mod llm;
pub mod runtime;
pub mod schema;

pub use fixtures::{new_query_state, new_query_state_as};
pub use kv::InMemoryKv;
pub use llm::{AlwaysFailsLlm, ScriptedLlm, ScriptedReply};
pub use runtime::{build_test_runtime, build_test_runtime_with_schema};
pub use schema::{FixedSchemaSource, UnreachableSchemaSource};
