use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use chunkflow_core::{ChunkflowError, ChunkflowResult};

use crate::hooks::{HookDecision, HookSet, ToolCallEvent};

/// One phase execution request handed to the runtime.
#[derive(Debug, Clone)]
pub struct AgentInvocation {
    /// Fully constructed prompt.
    pub prompt: String,
    /// Working directory (the worktree).
    pub cwd: PathBuf,
    /// Extra environment (`GIT_DIR`/`GIT_WORK_TREE` pinning).
    pub env: Vec<(String, String)>,
    /// Turn cap for this run.
    pub max_turns: u32,
    /// Session to resume, if any.
    pub resume_session: Option<String>,
}

/// A message from the agent runtime's event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    /// Session established.
    Init {
        /// Opaque session id, used for resume.
        session_id: String,
    },
    /// Free-form progress output.
    Message {
        /// Message text.
        #[serde(default)]
        content: String,
    },
    /// A tool call awaiting a hook decision.
    ToolCall {
        /// Call id, echoed in the decision.
        id: String,
        /// Tool name.
        tool: String,
        /// Raw tool input.
        #[serde(default)]
        input: serde_json::Value,
    },
    /// Terminal result of the run.
    Result {
        /// Whether the agent reported an error.
        #[serde(default)]
        is_error: bool,
        /// Result text, if any.
        #[serde(default)]
        result: Option<String>,
    },
}

/// Decision written back to the runtime for a pending tool call.
#[derive(Debug, Serialize)]
struct ToolDecision<'a> {
    r#type: &'static str,
    id: &'a str,
    decision: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'a str>,
    stop: bool,
}

/// What a runtime run amounted to.
#[derive(Debug, Clone, Default)]
pub struct RuntimeRun {
    /// Session id, when the runtime reported one.
    pub session_id: Option<String>,
    /// The agent ran to its natural end without error.
    pub completed: bool,
    /// Error text, when the agent raised or reported one.
    pub error: Option<String>,
    /// Set when a hook stopped the loop, with the hook's reason.
    pub stopped_by_hook: Option<String>,
}

/// Sink receiving every runtime event, for per-phase logs.
pub type EventSink = Arc<dyn Fn(&RuntimeEvent) + Send + Sync>;

/// The black-box agent runtime: run an agent for a chunk in a worktree, call
/// back on tool use, report completion.
///
/// Hooks are plain function pointers; the runtime calls them synchronously
/// from its own message loop and honours their decisions.
#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Execute one invocation to completion, suspension, or failure.
    async fn run(
        &self,
        invocation: AgentInvocation,
        hooks: &HookSet,
        on_event: &EventSink,
    ) -> ChunkflowResult<RuntimeRun>;
}

/// Process-backed runtime speaking newline-delimited JSON.
///
/// Spawns the agent command with the prompt and streams [`RuntimeEvent`]s
/// from its stdout; hook decisions go back as `tool_decision` lines on
/// stdin. A stop decision kills the child and ends the run.
pub struct ProcessAgentRuntime {
    program: String,
    extra_args: Vec<String>,
}

impl ProcessAgentRuntime {
    /// Default agent command.
    pub const DEFAULT_PROGRAM: &'static str = "claude";

    /// A runtime invoking the default agent command.
    pub fn new() -> Self {
        Self::with_program(Self::DEFAULT_PROGRAM)
    }

    /// A runtime invoking `program` instead.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            extra_args: Vec::new(),
        }
    }

    /// Extra arguments appended to every invocation.
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }
}

impl Default for ProcessAgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentRuntime for ProcessAgentRuntime {
    async fn run(
        &self,
        invocation: AgentInvocation,
        hooks: &HookSet,
        on_event: &EventSink,
    ) -> ChunkflowResult<RuntimeRun> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-p")
            .arg(&invocation.prompt)
            .arg("--output-format")
            .arg("stream-json")
            .arg("--input-format")
            .arg("stream-json")
            .arg("--max-turns")
            .arg(invocation.max_turns.to_string())
            .arg("--permission-mode")
            .arg("bypassPermissions")
            .arg("--setting-sources")
            .arg("project");
        if let Some(session) = &invocation.resume_session {
            cmd.arg("--resume").arg(session);
        }
        cmd.args(&self.extra_args);
        cmd.current_dir(&invocation.cwd);
        for (key, value) in &invocation.env {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            ChunkflowError::Agent(format!(
                "failed to spawn agent runtime '{}': {e}",
                self.program
            ))
        })?;

        let mut stdin = child.stdin.take().ok_or_else(|| {
            ChunkflowError::Agent("agent runtime stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            ChunkflowError::Agent("agent runtime stdout unavailable".to_string())
        })?;

        let mut run = RuntimeRun::default();
        let mut lines = BufReader::new(stdout).lines();

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| ChunkflowError::Agent(format!("agent stream read failed: {e}")))?
        {
            let event: RuntimeEvent = match serde_json::from_str(&line) {
                Ok(event) => event,
                Err(_) => {
                    debug!(line = %line, "skipping non-event agent output");
                    continue;
                }
            };
            on_event(&event);

            match &event {
                RuntimeEvent::Init { session_id } => {
                    run.session_id = Some(session_id.clone());
                }
                RuntimeEvent::Message { .. } => {}
                RuntimeEvent::ToolCall { id, tool, input } => {
                    let decision = hooks.evaluate(&ToolCallEvent {
                        id: id.clone(),
                        tool: tool.clone(),
                        input: input.clone(),
                    });
                    let (verdict, reason, stop) = match &decision {
                        HookDecision::Allow => ("allow", None, false),
                        HookDecision::Deny { reason } => ("deny", Some(reason.as_str()), false),
                        HookDecision::DenyAndStop { reason } => {
                            ("deny", Some(reason.as_str()), true)
                        }
                    };
                    let response = serde_json::to_string(&ToolDecision {
                        r#type: "tool_decision",
                        id,
                        decision: verdict,
                        reason,
                        stop,
                    })?;
                    if stdin.write_all(response.as_bytes()).await.is_err()
                        || stdin.write_all(b"\n").await.is_err()
                    {
                        warn!("agent runtime closed stdin mid-run");
                    }

                    if stop {
                        run.stopped_by_hook = reason.map(str::to_string);
                        let _ = child.kill().await;
                        break;
                    }
                }
                RuntimeEvent::Result { is_error, result } => {
                    if *is_error {
                        run.error = Some(
                            result
                                .clone()
                                .unwrap_or_else(|| "Agent returned error".to_string()),
                        );
                    } else {
                        run.completed = true;
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ChunkflowError::Agent(format!("agent runtime wait failed: {e}")))?;

        if !status.success()
            && run.stopped_by_hook.is_none()
            && !run.completed
            && run.error.is_none()
        {
            run.error = Some(format!(
                "agent runtime exited with status {}",
                status.code().map_or_else(|| "signal".to_string(), |c| c.to_string())
            ));
        }

        Ok(run)
    }
}
