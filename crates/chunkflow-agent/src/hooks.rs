use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::sandbox;

/// A tool invocation reported by the agent runtime before execution.
#[derive(Debug, Clone)]
pub struct ToolCallEvent {
    /// Runtime-assigned call id, echoed back in the decision.
    pub id: String,
    /// Tool name (e.g. `Bash`, `AskUserQuestion`).
    pub tool: String,
    /// Raw tool input.
    pub input: serde_json::Value,
}

/// A hook's decision for a pending tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookDecision {
    /// Let the tool run.
    Allow,
    /// Block the tool; the agent continues its turn.
    Deny {
        /// Human-readable reason returned to the agent.
        reason: String,
    },
    /// Block the tool and stop the agent loop.
    DenyAndStop {
        /// Human-readable reason recorded on the run.
        reason: String,
    },
}

/// A pre-tool-use hook bound to a tool name.
#[derive(Clone)]
pub struct ToolHook {
    /// Tool name this hook matches.
    pub matcher: String,
    /// The hook itself; called synchronously from the runtime's message loop.
    pub hook: Arc<dyn Fn(&ToolCallEvent) -> HookDecision + Send + Sync>,
}

/// An ordered set of pre-tool-use hooks.
#[derive(Clone, Default)]
pub struct HookSet {
    hooks: Vec<ToolHook>,
}

impl HookSet {
    /// An empty hook set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook.
    pub fn push(&mut self, hook: ToolHook) {
        self.hooks.push(hook);
    }

    /// Evaluate hooks matching the event's tool; first non-allow wins.
    pub fn evaluate(&self, event: &ToolCallEvent) -> HookDecision {
        for hook in self.hooks.iter().filter(|h| h.matcher == event.tool) {
            match (hook.hook)(event) {
                HookDecision::Allow => continue,
                decision => return decision,
            }
        }
        HookDecision::Allow
    }
}

/// One selectable option of a captured question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    /// Display label.
    pub label: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A question captured from the ask-user-question tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionRecord {
    /// Primary question text (first question of the call).
    pub question: String,
    /// Options of the primary question.
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Short header of the primary question.
    #[serde(default)]
    pub header: String,
    /// Whether multiple options may be selected.
    #[serde(default)]
    pub multi_select: bool,
    /// Every question of the call, verbatim.
    #[serde(default)]
    pub all_questions: serde_json::Value,
}

impl QuestionRecord {
    /// Extract the question record from the tool input.
    ///
    /// The tool carries a `questions` array of 1–4 entries; the first one
    /// becomes the primary display, the rest ride along in `all_questions`.
    pub fn from_tool_input(input: &serde_json::Value) -> Self {
        let questions = input
            .get("questions")
            .and_then(|q| q.as_array())
            .cloned()
            .unwrap_or_default();

        match questions.first() {
            Some(first) => Self {
                question: first
                    .get("question")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                options: first
                    .get("options")
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
                header: first
                    .get("header")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
                multi_select: first
                    .get("multiSelect")
                    .and_then(serde_json::Value::as_bool)
                    .unwrap_or(false),
                all_questions: serde_json::Value::Array(questions),
            },
            None => Self {
                question: "Agent asked a question (no details available)".to_string(),
                options: Vec::new(),
                header: String::new(),
                multi_select: false,
                all_questions: serde_json::Value::Array(Vec::new()),
            },
        }
    }
}

/// The sandbox-enforcement hook on the shell tool.
///
/// Blocks commands that would escape the worktree; the agent continues or
/// ends its turn on its own.
pub fn sandbox_enforcement_hook(host_repo: PathBuf, worktree: PathBuf) -> ToolHook {
    ToolHook {
        matcher: "Bash".to_string(),
        hook: Arc::new(move |event: &ToolCallEvent| {
            let command = event
                .input
                .get("command")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            match sandbox::violation(command, &host_repo, &worktree) {
                Some(reason) => HookDecision::Deny { reason },
                None => HookDecision::Allow,
            }
        }),
    }
}

/// The question-intercept hook on the ask-user-question tool.
///
/// Captures the question, invokes `on_question`, and stops the agent loop so
/// it does not wait on stdin; the supervisor converts the stop into a
/// suspended outcome.
pub fn question_intercept_hook(
    on_question: Arc<dyn Fn(QuestionRecord) + Send + Sync>,
) -> ToolHook {
    ToolHook {
        matcher: "AskUserQuestion".to_string(),
        hook: Arc::new(move |event: &ToolCallEvent| {
            on_question(QuestionRecord::from_tool_input(&event.input));
            HookDecision::DenyAndStop {
                reason: "Question forwarded to attention queue for operator response".to_string(),
            }
        }),
    }
}
