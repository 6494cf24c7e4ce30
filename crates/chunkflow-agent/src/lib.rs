//! Agent phase supervision.
//!
//! Runs a single phase of a chunk inside its worktree through a black-box
//! [`AgentRuntime`], with two pre-tool-use hooks installed: sandbox
//! enforcement on shell commands and question interception on the
//! ask-user-question tool. A phase run ends in a three-way
//! [`AgentOutcome`]: completed, suspended on a question, or failed.

/// Pre-tool-use hooks and question records.
pub mod hooks;
/// The agent runtime seam and its process-backed implementation.
pub mod runtime;
/// Sandbox violation detection for shell commands.
pub mod sandbox;
/// Phase supervision: prompts, hooks, outcomes, logs.
pub mod supervisor;

pub use hooks::{
    question_intercept_hook, sandbox_enforcement_hook, HookDecision, HookSet, QuestionRecord,
    ToolCallEvent, ToolHook,
};
pub use runtime::{
    AgentInvocation, AgentRuntime, EventSink, ProcessAgentRuntime, RuntimeEvent, RuntimeRun,
};
pub use sandbox::violation;
pub use supervisor::{file_log_sink, AgentOutcome, PhaseSupervisor, QuestionCallback};
