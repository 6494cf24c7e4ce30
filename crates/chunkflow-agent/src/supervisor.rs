use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{info, warn};

use chunkflow_core::frontmatter::split_frontmatter;
use chunkflow_core::{ChunkflowError, ChunkflowResult, WorkUnitPhase};

use crate::hooks::{question_intercept_hook, sandbox_enforcement_hook, HookSet, QuestionRecord};
use crate::runtime::{AgentInvocation, AgentRuntime, EventSink, RuntimeEvent, RuntimeRun};

/// Turn cap for a normal phase run.
const PHASE_MAX_TURNS: u32 = 100;
/// Turn cap for the ACTIVE-status resume and for agent-driven commits.
const RESUME_MAX_TURNS: u32 = 20;

/// Reminder sent when the completion ritual finished without flipping the
/// chunk to ACTIVE.
const ACTIVE_STATUS_REMINDER: &str = "The chunk-complete pass finished but the chunk's GOAL.md \
status was not updated to ACTIVE. Please complete the final step:\n\n\
1. Open the chunk's GOAL.md file\n\
2. Change the frontmatter `status: IMPLEMENTING` to `status: ACTIVE`\n\
3. Remove the large comment block that starts with 'DO NOT DELETE THIS COMMENT BLOCK'\n\n\
This is the final step to complete the chunk.";

/// Three-way outcome of supervising one agent phase.
#[derive(Debug, Clone)]
pub enum AgentOutcome {
    /// The agent ran to its natural end without error.
    Completed {
        /// Session id for potential resume.
        session_id: Option<String>,
    },
    /// The agent asked a question and was stopped.
    Suspended {
        /// Session id to resume with the operator's answer.
        session_id: Option<String>,
        /// The captured question.
        question: QuestionRecord,
    },
    /// The agent raised or reported an error.
    Failed {
        /// Session id, when one was established.
        session_id: Option<String>,
        /// The error text.
        error: String,
    },
}

/// Callback invoked when the question-intercept hook fires.
pub type QuestionCallback = Arc<dyn Fn(&QuestionRecord) + Send + Sync>;

/// Supervises single-phase agent runs inside chunk worktrees.
///
/// Each phase is a fresh session; context never carries over between phases
/// except through explicit session resume.
pub struct PhaseSupervisor {
    project_dir: PathBuf,
    runtime: Arc<dyn AgentRuntime>,
}

impl PhaseSupervisor {
    /// Create a supervisor for the host repository at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>, runtime: Arc<dyn AgentRuntime>) -> Self {
        Self {
            project_dir: project_dir.into(),
            runtime,
        }
    }

    /// Path of the skill file driving `phase`.
    pub fn skill_path(&self, phase: WorkUnitPhase) -> PathBuf {
        self.project_dir
            .join(".claude")
            .join("commands")
            .join(phase.skill_file())
    }

    /// Load a skill file, stripping YAML frontmatter when present.
    fn load_skill(path: &Path) -> ChunkflowResult<String> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ChunkflowError::Agent(format!("failed to read skill {}: {e}", path.display()))
        })?;
        match split_frontmatter(&raw) {
            Ok((_, body)) => Ok(body.trim().to_string()),
            Err(_) => Ok(raw.trim().to_string()),
        }
    }

    /// Build the prompt for a phase, before the sandbox preamble.
    pub fn phase_prompt(&self, chunk: &str, phase: WorkUnitPhase) -> ChunkflowResult<String> {
        let mut content = Self::load_skill(&self.skill_path(phase))?;
        if phase == WorkUnitPhase::Goal {
            let arguments = format!("Refine the GOAL.md for existing chunk: {chunk}");
            content = content.replace("$ARGUMENTS", &arguments);
        }
        Ok(content)
    }

    fn sandbox_preamble(worktree: &Path) -> String {
        format!(
            "**Working Directory:** `{}`\n\
             Use relative paths (e.g., `docs/chunks/...`) or paths relative to this directory.\n\
             Do NOT guess absolute paths from memory - they will be wrong.\n\n\
             ## SANDBOX RULES (CRITICAL)\n\n\
             You are operating in an isolated git worktree. You MUST:\n\
             - NEVER use `cd` with absolute paths outside this directory\n\
             - NEVER run git commands targeting the host repository\n\
             - ALWAYS use relative paths from the current worktree\n\
             - ONLY commit to the current branch in this worktree\n\n\
             Violations will be blocked and logged.\n\n",
            worktree.display()
        )
    }

    fn pinned_env(worktree: &Path) -> Vec<(String, String)> {
        vec![
            (
                "GIT_DIR".to_string(),
                worktree.join(".git").display().to_string(),
            ),
            (
                "GIT_WORK_TREE".to_string(),
                worktree.display().to_string(),
            ),
        ]
    }

    fn base_hooks(&self, worktree: &Path) -> HookSet {
        let mut hooks = HookSet::new();
        hooks.push(sandbox_enforcement_hook(
            self.project_dir.clone(),
            worktree.to_path_buf(),
        ));
        hooks
    }

    fn outcome(run: RuntimeRun, captured: Option<QuestionRecord>) -> AgentOutcome {
        if let Some(question) = captured {
            return AgentOutcome::Suspended {
                session_id: run.session_id,
                question,
            };
        }
        if let Some(error) = run.error {
            return AgentOutcome::Failed {
                session_id: run.session_id,
                error,
            };
        }
        if run.completed {
            return AgentOutcome::Completed {
                session_id: run.session_id,
            };
        }
        let error = match run.stopped_by_hook {
            Some(reason) => format!("Agent stopped by hook: {reason}"),
            None => "Agent ended in unknown state".to_string(),
        };
        AgentOutcome::Failed {
            session_id: run.session_id,
            error,
        }
    }

    /// Run a single phase for a chunk in its worktree.
    ///
    /// `injected_answer` is the named answer-injection operation: on resume it
    /// is textually prepended as `User answer: <answer>` to the prompt.
    #[allow(clippy::too_many_arguments)]
    pub async fn run_phase(
        &self,
        chunk: &str,
        phase: WorkUnitPhase,
        worktree: &Path,
        resume_session: Option<String>,
        injected_answer: Option<String>,
        question_callback: Option<QuestionCallback>,
        on_event: EventSink,
    ) -> ChunkflowResult<AgentOutcome> {
        let mut prompt = format!(
            "{}{}",
            Self::sandbox_preamble(worktree),
            self.phase_prompt(chunk, phase)?
        );

        if resume_session.is_some() {
            if let Some(answer) = &injected_answer {
                prompt = format!("User answer: {answer}\n\n{prompt}");
            }
        }

        let mut hooks = self.base_hooks(worktree);
        let captured: Arc<Mutex<Option<QuestionRecord>>> = Arc::new(Mutex::new(None));
        {
            let captured = captured.clone();
            hooks.push(question_intercept_hook(Arc::new(move |question| {
                if let Some(callback) = &question_callback {
                    callback(&question);
                }
                *captured.lock() = Some(question);
            })));
        }

        info!(chunk, %phase, resuming = resume_session.is_some(), "running agent phase");
        let run = self
            .runtime
            .run(
                AgentInvocation {
                    prompt,
                    cwd: worktree.to_path_buf(),
                    env: Self::pinned_env(worktree),
                    max_turns: PHASE_MAX_TURNS,
                    resume_session,
                },
                &hooks,
                &on_event,
            )
            .await?;

        let captured = captured.lock().take();
        Ok(Self::outcome(run, captured))
    }

    /// Run the chunk-commit skill in the worktree.
    ///
    /// The scheduler prefers the worktree manager's mechanical commit; this
    /// agent-driven path remains for manual invocation and debugging.
    pub async fn run_commit(
        &self,
        chunk: &str,
        worktree: &Path,
        on_event: EventSink,
    ) -> ChunkflowResult<AgentOutcome> {
        let skill = self
            .project_dir
            .join(".claude")
            .join("commands")
            .join("chunk-commit.md");
        let prompt = if skill.is_file() {
            Self::load_skill(&skill)?
        } else {
            format!(
                "Please commit all changes for chunk {chunk} with a proper conventional \
                 commit message describing what was done."
            )
        };

        let hooks = self.base_hooks(worktree);
        let run = self
            .runtime
            .run(
                AgentInvocation {
                    prompt,
                    cwd: worktree.to_path_buf(),
                    env: Self::pinned_env(worktree),
                    max_turns: RESUME_MAX_TURNS,
                    resume_session: None,
                },
                &hooks,
                &on_event,
            )
            .await?;
        Ok(Self::outcome(run, None))
    }

    /// Resume a COMPLETE-phase session to finish marking the chunk ACTIVE.
    pub async fn resume_for_active_status(
        &self,
        chunk: &str,
        worktree: &Path,
        session_id: &str,
        on_event: EventSink,
    ) -> ChunkflowResult<AgentOutcome> {
        let hooks = self.base_hooks(worktree);
        info!(chunk, session_id, "resuming agent to mark chunk ACTIVE");
        let mut run = self
            .runtime
            .run(
                AgentInvocation {
                    prompt: ACTIVE_STATUS_REMINDER.to_string(),
                    cwd: worktree.to_path_buf(),
                    env: Self::pinned_env(worktree),
                    max_turns: RESUME_MAX_TURNS,
                    resume_session: Some(session_id.to_string()),
                },
                &hooks,
                &on_event,
            )
            .await?;
        if run.session_id.is_none() {
            run.session_id = Some(session_id.to_string());
        }
        Ok(Self::outcome(run, None))
    }
}

/// An [`EventSink`] appending timestamped events to `logs/<phase>.txt`.
pub fn file_log_sink(log_dir: &Path, phase: WorkUnitPhase) -> EventSink {
    let log_file = log_dir.join(format!("{}.txt", phase.to_string().to_lowercase()));
    if let Err(e) = std::fs::create_dir_all(log_dir) {
        warn!(dir = %log_dir.display(), error = %e, "failed to create agent log dir");
    }
    Arc::new(move |event: &RuntimeEvent| {
        let line = serde_json::to_string(event)
            .unwrap_or_else(|_| "<unserializable event>".to_string());
        let stamped = format!("[{}] {line}\n", Utc::now().to_rfc3339());
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .and_then(|mut f| std::io::Write::write_all(&mut f, stamped.as_bytes()));
        if let Err(e) = result {
            warn!(file = %log_file.display(), error = %e, "failed to append agent log");
        }
    })
}
