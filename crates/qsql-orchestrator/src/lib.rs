//! qsql-orchestrator — the query pipeline (spec C10 node functions + C11
//! driver).
//!
//! [`nodes`] holds the seven pure `State -> State` stage functions; [`driver`]
//! owns the loop that dispatches them, checkpoints after each one, and
//! decides retry-vs-terminal on failure; [`runtime`] is the constructor-
//! injected bundle of collaborators every node reads from; [`checkpoint`]
//! defines the checkpoint-store contract and its in-memory fallback;
//! [`taxonomy_fallback`] is the deterministic classifier `understand` falls
//! back to when the LLM path fails.

pub mod checkpoint;
pub mod driver;
pub mod nodes;
pub mod runtime;
pub mod taxonomy_fallback;

pub use checkpoint::{CheckpointStore, Checkpointer, InMemoryCheckpointer};
pub use driver::{CancelSignal, DriverOutcome, OrchestratorDriver};
pub use runtime::{Runtime, RuntimeConfig};
