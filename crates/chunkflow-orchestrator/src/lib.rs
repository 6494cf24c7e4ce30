//! Orchestration engine: the dispatch scheduler and the conflict oracle.
//!
//! The scheduler runs a background loop that drains the ready queue up to
//! `max_agents`, consults the oracle before dispatching, runs agent phases in
//! isolated worktrees, and commits and merges finished chunks back to the
//! base branch. The oracle classifies chunk pairs as INDEPENDENT, SERIALIZE,
//! or ASK_OPERATOR from their `code_references` and causal ancestry.

/// Chunk activation and displacement inside a worktree.
pub mod activation;
/// The conflict oracle.
pub mod oracle;
/// The dispatch scheduler.
pub mod scheduler;

pub use activation::{activate_chunk, restore_displaced_chunk};
pub use oracle::ConflictOracle;
pub use scheduler::Scheduler;
