use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use chunkflow_agent::{
    file_log_sink, AgentOutcome, AgentRuntime, PhaseSupervisor, QuestionCallback,
};
use chunkflow_core::{
    ChunkStatus, Chunks, ChunkflowResult, ConflictVerdict, WorkUnitPhase, WorkUnitStatus,
};
use chunkflow_state::{OrchestratorConfig, StateStore, WorkUnit};
use chunkflow_worktree::WorktreeManager;

use crate::activation::{activate_chunk, restore_displaced_chunk};
use crate::oracle::ConflictOracle;

/// Result of verifying a completed chunk's GOAL.md status.
enum Verification {
    /// ACTIVE: proceed with commit and merge.
    Active,
    /// Still IMPLEMENTING: the agent skipped the completion ritual.
    Implementing,
    /// Unreadable or unexpected status.
    Error(String),
}

fn verify_chunk_active(worktree: &Path, chunk: &str) -> Verification {
    let chunks = Chunks::new(worktree);
    match chunks.frontmatter(chunk) {
        Ok(Some(frontmatter)) => match frontmatter.status {
            ChunkStatus::Active => Verification::Active,
            ChunkStatus::Implementing => Verification::Implementing,
            other => Verification::Error(format!(
                "Unexpected status '{other}' in GOAL.md (expected ACTIVE)"
            )),
        },
        Ok(None) => Verification::Error(format!("Chunk '{chunk}' not found or GOAL.md missing")),
        Err(e) => Verification::Error(format!("Error reading GOAL.md: {e}")),
    }
}

/// The dispatch scheduler.
///
/// Maintains the set of running per-chunk agent tasks and dispatches new
/// ones from the ready queue when slots are free and the oracle does not
/// object. The internal lock is held only across a dispatch tick, never
/// across agent or git calls.
pub struct Scheduler {
    project_dir: PathBuf,
    store: Arc<StateStore>,
    supervisor: Arc<PhaseSupervisor>,
    running: Mutex<HashMap<String, JoinHandle<()>>>,
    stopping: AtomicBool,
    wake: Notify,
}

impl Scheduler {
    /// Create a scheduler for the repository at `project_dir`.
    pub fn new(
        project_dir: impl Into<PathBuf>,
        store: Arc<StateStore>,
        runtime: Arc<dyn AgentRuntime>,
    ) -> Arc<Self> {
        let project_dir = project_dir.into();
        let supervisor = Arc::new(PhaseSupervisor::new(&project_dir, runtime));
        Arc::new(Self {
            project_dir,
            store,
            supervisor,
            running: Mutex::new(HashMap::new()),
            stopping: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    fn worktree_manager(&self, config: &OrchestratorConfig) -> WorktreeManager {
        WorktreeManager::new(&self.project_dir, &config.base_branch)
    }

    /// Number of currently running agent tasks.
    pub async fn running_count(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Run the dispatch loop until [`Scheduler::stop`] is called.
    ///
    /// Performs crash recovery first: stale RUNNING units are reset to READY
    /// and orphaned worktrees are swept.
    pub async fn run(self: Arc<Self>) {
        let config = self
            .store
            .load_config()
            .unwrap_or_else(|_| OrchestratorConfig::default());
        info!(
            max_agents = config.max_agents,
            interval = config.dispatch_interval_seconds,
            "scheduler started"
        );

        if let Err(e) = self.recover().await {
            error!(error = %e, "crash recovery failed");
        }

        while !self.stopping.load(Ordering::SeqCst) {
            if let Err(e) = Arc::clone(&self).dispatch_tick().await {
                error!(error = %e, "error in dispatch tick");
            }

            let interval = self
                .store
                .load_config()
                .map(|c| c.dispatch_interval_seconds)
                .unwrap_or(1.0)
                .max(0.01);
            let _ = tokio::time::timeout(
                Duration::from_secs_f64(interval),
                self.wake.notified(),
            )
            .await;
        }

        info!("scheduler stopped");
    }

    /// Stop the dispatch loop, draining running agents up to the configured
    /// shutdown timeout; stragglers are aborted and reconciled at next start.
    pub async fn stop(&self) {
        info!("stopping scheduler");
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();

        let handles: Vec<(String, JoinHandle<()>)> =
            self.running.lock().await.drain().collect();
        if handles.is_empty() {
            return;
        }

        let timeout = self
            .store
            .load_config()
            .map(|c| c.shutdown_timeout_seconds)
            .unwrap_or(30);
        info!(count = handles.len(), timeout, "waiting for running agents");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
        for (chunk, mut handle) in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, &mut handle).await.is_err() {
                warn!(chunk, "timeout waiting for agent, cancelling");
                handle.abort();
            }
        }
    }

    /// Crash recovery: reset stale RUNNING units to READY (clearing the
    /// worktree path) and remove worktrees no RUNNING unit owns.
    pub async fn recover(&self) -> ChunkflowResult<()> {
        info!("checking for recovery from previous crash");

        for mut unit in self.store.list_work_units(Some(WorkUnitStatus::Running))? {
            warn!(chunk = %unit.chunk, "found orphaned RUNNING work unit, resetting to READY");
            unit.status = WorkUnitStatus::Ready;
            unit.worktree = None;
            self.store.update_work_unit(&unit)?;
        }

        let config = self.store.load_config()?;
        let manager = self.worktree_manager(&config);
        for chunk in manager.list_worktree_dirs() {
            let owner_running = self
                .store
                .get_work_unit(&chunk)?
                .map(|u| u.status == WorkUnitStatus::Running)
                .unwrap_or(false);
            if !owner_running {
                info!(chunk, "removing orphaned worktree");
                if let Err(e) = manager.remove_worktree(&chunk, false).await {
                    warn!(chunk, error = %e, "failed to remove orphaned worktree");
                }
            }
        }
        Ok(())
    }

    /// One dispatch cycle, under the scheduler lock.
    ///
    /// Reaps finished tasks, then fills free slots from the ready queue,
    /// consulting the oracle before each dispatch.
    pub async fn dispatch_tick(self: Arc<Self>) -> ChunkflowResult<()> {
        let mut running = self.running.lock().await;

        // Reap finished agent tasks.
        running.retain(|_, handle| !handle.is_finished());

        let config = self.store.load_config()?;
        let slots = config.max_agents.saturating_sub(running.len());
        if slots == 0 {
            return Ok(());
        }

        let ready = self.store.get_ready_queue(Some(slots))?;
        for unit in ready {
            if running.contains_key(&unit.chunk) {
                continue;
            }

            let mut unit = unit;
            let blocking = self.check_conflicts(&mut unit)?;
            if !blocking.is_empty() {
                info!(chunk = %unit.chunk, ?blocking, "work unit blocked by conflicts");
                continue;
            }

            let chunk = unit.chunk.clone();
            info!(
                chunk = %chunk,
                phase = %unit.phase,
                priority = unit.priority,
                "dispatching agent"
            );
            let this = Arc::clone(&self);
            let handle = tokio::spawn(async move {
                this.run_work_unit(unit).await;
            });
            running.insert(chunk, handle);
        }
        Ok(())
    }

    /// Check `unit` against every RUNNING and READY peer; returns blockers.
    ///
    /// Verdicts are cached on both work units. A SERIALIZE or unresolved
    /// ASK_OPERATOR verdict against a RUNNING peer blocks; an unresolved
    /// conflict with a RUNNING peer additionally parks the unit in
    /// NEEDS_ATTENTION for the operator. A conflicting READY peer only logs.
    fn check_conflicts(&self, unit: &mut WorkUnit) -> ChunkflowResult<Vec<String>> {
        let running_units = self.store.list_work_units(Some(WorkUnitStatus::Running))?;
        let ready_units = self.store.list_work_units(Some(WorkUnitStatus::Ready))?;

        let running_names: BTreeSet<&str> =
            running_units.iter().map(|u| u.chunk.as_str()).collect();
        let peers: Vec<String> = running_units
            .iter()
            .chain(ready_units.iter())
            .map(|u| u.chunk.clone())
            .filter(|c| c != &unit.chunk)
            .collect();

        if peers.is_empty() {
            return Ok(Vec::new());
        }

        let oracle = ConflictOracle::new(&self.project_dir, self.store.clone());
        let mut blocking: Vec<String> = Vec::new();

        for other in peers {
            let verdict = match unit.conflict_verdicts.get(&other) {
                Some(cached) => *cached,
                None => match oracle.analyze_conflict(&unit.chunk, &other) {
                    Ok(analysis) => {
                        unit.conflict_verdicts.insert(other.clone(), analysis.verdict);
                        *unit = self.store.update_work_unit(unit)?;
                        if let Some(mut peer) = self.store.get_work_unit(&other)? {
                            peer.conflict_verdicts
                                .insert(unit.chunk.clone(), analysis.verdict);
                            self.store.update_work_unit(&peer)?;
                        }
                        analysis.verdict
                    }
                    Err(e) => {
                        error!(chunk = %unit.chunk, other = %other, error = %e, "conflict analysis failed");
                        continue;
                    }
                },
            };

            let other_running = running_names.contains(other.as_str());
            match verdict {
                ConflictVerdict::Independent => {}
                ConflictVerdict::Serialize => {
                    if other_running {
                        info!(chunk = %unit.chunk, blocker = %other, "blocked by running chunk");
                        blocking.push(other);
                    }
                }
                ConflictVerdict::AskOperator => {
                    if let Some(override_verdict) = unit.conflict_override {
                        if override_verdict == ConflictVerdict::Serialize && other_running {
                            blocking.push(other);
                        }
                        // An INDEPENDENT override means no blocking.
                    } else if other_running {
                        self.mark_needs_attention(
                            unit,
                            format!(
                                "Unresolved conflict with running {other}. \
                                 Use 'chunkflow orch resolve' to parallelize or serialize."
                            ),
                        )?;
                        blocking.push(other);
                    } else {
                        warn!(
                            chunk = %unit.chunk,
                            other = %other,
                            "unresolved conflict between ready chunks; resolve before both start"
                        );
                    }
                }
            }
        }

        if !blocking.is_empty() {
            let merged: BTreeSet<String> = unit
                .blocked_by
                .iter()
                .cloned()
                .chain(blocking.iter().cloned())
                .collect();
            let current: BTreeSet<String> = unit.blocked_by.iter().cloned().collect();
            if merged != current || unit.status == WorkUnitStatus::Ready {
                unit.blocked_by = merged.into_iter().collect();
                if unit.status == WorkUnitStatus::Ready {
                    unit.status = WorkUnitStatus::Blocked;
                }
                *unit = self.store.update_work_unit(unit)?;
            }
        }

        Ok(blocking)
    }

    /// Execute a single work unit; any error parks it in NEEDS_ATTENTION.
    async fn run_work_unit(self: Arc<Self>, mut unit: WorkUnit) {
        let chunk = unit.chunk.clone();
        if let Err(e) = self.execute_work_unit(&mut unit).await {
            error!(chunk = %chunk, error = %e, "error running work unit");
            if let Err(mark_err) = self.mark_needs_attention(&mut unit, e.to_string()) {
                error!(chunk = %chunk, error = %mark_err, "failed to record attention state");
            }
        }
    }

    async fn execute_work_unit(&self, unit: &mut WorkUnit) -> ChunkflowResult<()> {
        let config = self.store.load_config()?;
        let manager = self.worktree_manager(&config);

        info!(chunk = %unit.chunk, "creating worktree");
        let worktree = manager.create_worktree(&unit.chunk).await?;

        match activate_chunk(&worktree, &unit.chunk) {
            Ok(Some(displaced)) => {
                info!(chunk = %unit.chunk, displaced = %displaced, "stored displaced chunk for restoration");
                unit.displaced_chunk = Some(displaced);
            }
            Ok(None) => {}
            Err(e) => {
                self.mark_needs_attention(unit, format!("Chunk activation failed: {e}"))?;
                return Ok(());
            }
        }

        unit.status = WorkUnitStatus::Running;
        unit.worktree = Some(worktree.display().to_string());
        *unit = self.store.update_work_unit(unit)?;

        let sink = file_log_sink(&manager.log_path(&unit.chunk), unit.phase);
        let pending_answer = unit.pending_answer.clone();
        if pending_answer.is_some() {
            info!(chunk = %unit.chunk, "injecting pending answer");
        }

        let chunk_name = unit.chunk.clone();
        let question_callback: QuestionCallback = Arc::new(move |question| {
            info!(chunk = %chunk_name, question = %question.question, "agent asked a question");
        });

        info!(chunk = %unit.chunk, phase = %unit.phase, "running agent");
        let outcome = self
            .supervisor
            .run_phase(
                &unit.chunk,
                unit.phase,
                &worktree,
                unit.session_id.clone(),
                pending_answer.clone(),
                Some(question_callback),
                sink,
            )
            .await?;

        // Answer injection is one-shot: clear after dispatch.
        if pending_answer.is_some() {
            unit.pending_answer = None;
            *unit = self.store.update_work_unit(unit)?;
        }

        self.handle_agent_outcome(unit, outcome, &manager, &config)
            .await
    }

    async fn handle_agent_outcome(
        &self,
        unit: &mut WorkUnit,
        outcome: AgentOutcome,
        manager: &WorktreeManager,
        config: &OrchestratorConfig,
    ) -> ChunkflowResult<()> {
        match outcome {
            AgentOutcome::Suspended {
                session_id,
                question,
            } => {
                info!(chunk = %unit.chunk, "agent suspended on question");
                let text = if question.question.is_empty() {
                    "Agent asked a question".to_string()
                } else {
                    question.question
                };
                unit.status = WorkUnitStatus::NeedsAttention;
                unit.session_id = session_id;
                unit.attention_reason = Some(format!("Question: {text}"));
                *unit = self.store.update_work_unit(unit)?;
                Ok(())
            }
            AgentOutcome::Failed { error, .. } => {
                error!(chunk = %unit.chunk, error = %error, "agent failed");
                self.mark_needs_attention(unit, error)
            }
            AgentOutcome::Completed { session_id } => {
                info!(chunk = %unit.chunk, phase = %unit.phase, "agent completed phase");
                // Retain the session so the completion-verification resume
                // can continue it.
                if session_id.is_some() {
                    unit.session_id = session_id;
                }
                self.advance_phase(unit, manager, config).await
            }
        }
    }

    async fn advance_phase(
        &self,
        unit: &mut WorkUnit,
        manager: &WorktreeManager,
        config: &OrchestratorConfig,
    ) -> ChunkflowResult<()> {
        if let Some(next) = unit.phase.next() {
            info!(chunk = %unit.chunk, next = %next, "advancing to next phase");
            unit.phase = next;
            unit.status = WorkUnitStatus::Ready;
            unit.session_id = None;
            *unit = self.store.update_work_unit(unit)?;

            // PLAN may have materialised more precise location hints; drop
            // stale analyses so the next tick re-runs the oracle.
            self.reanalyze_conflicts(&unit.chunk)?;
            return Ok(());
        }

        info!(chunk = %unit.chunk, "work unit completed all phases");
        let worktree = manager.worktree_path(&unit.chunk);

        loop {
            match verify_chunk_active(&worktree, &unit.chunk) {
                Verification::Active => break,
                Verification::Error(e) => {
                    return self.mark_needs_attention(unit, e);
                }
                Verification::Implementing => {
                    if unit.completion_retries >= config.max_completion_retries {
                        return self.mark_needs_attention(
                            unit,
                            format!(
                                "Chunk status still IMPLEMENTING after {} retries",
                                unit.completion_retries
                            ),
                        );
                    }
                    unit.completion_retries += 1;
                    *unit = self.store.update_work_unit(unit)?;

                    let Some(session) = unit.session_id.clone() else {
                        return self.mark_needs_attention(
                            unit,
                            "Cannot resume for ACTIVE status: no session recorded".to_string(),
                        );
                    };

                    info!(
                        chunk = %unit.chunk,
                        attempt = unit.completion_retries,
                        "resuming agent to mark ACTIVE"
                    );
                    let sink =
                        file_log_sink(&manager.log_path(&unit.chunk), WorkUnitPhase::Complete);
                    let resumed = self
                        .supervisor
                        .resume_for_active_status(&unit.chunk, &worktree, &session, sink)
                        .await;

                    match resumed {
                        Ok(AgentOutcome::Completed { session_id }) => {
                            if session_id.is_some() {
                                unit.session_id = session_id;
                                *unit = self.store.update_work_unit(unit)?;
                            }
                            // Loop back and re-verify.
                        }
                        Ok(AgentOutcome::Suspended {
                            session_id,
                            question,
                        }) => {
                            unit.status = WorkUnitStatus::NeedsAttention;
                            unit.session_id = session_id;
                            unit.attention_reason =
                                Some(format!("Question: {}", question.question));
                            *unit = self.store.update_work_unit(unit)?;
                            return Ok(());
                        }
                        Ok(AgentOutcome::Failed { error, .. }) => {
                            return self.mark_needs_attention(
                                unit,
                                format!("Resume for ACTIVE status failed: {error}"),
                            );
                        }
                        Err(e) => {
                            return self.mark_needs_attention(
                                unit,
                                format!("Resume for ACTIVE status failed: {e}"),
                            );
                        }
                    }
                }
            }
        }

        // Mechanical commit of whatever the agent left uncommitted.
        if manager.has_uncommitted_changes(&unit.chunk).await? {
            info!(chunk = %unit.chunk, "committing uncommitted changes");
            if let Err(e) = manager.commit_changes(&unit.chunk).await {
                return self.mark_needs_attention(unit, format!("Commit error: {e}"));
            }
        }

        // Restore the displaced chunk before merging so the operator's
        // manually active chunk survives, and commit the restore so it
        // actually reaches the base branch.
        if let Some(displaced) = unit.displaced_chunk.clone() {
            info!(chunk = %unit.chunk, displaced = %displaced, "restoring displaced chunk before merge");
            restore_displaced_chunk(&worktree, &displaced);
            if manager.has_uncommitted_changes(&unit.chunk).await.unwrap_or(false) {
                if let Err(e) = manager.commit_changes(&unit.chunk).await {
                    warn!(chunk = %unit.chunk, error = %e, "failed to commit displaced-chunk restore");
                }
            }
        }

        // The worktree must be gone before the merge touches the base branch.
        if let Err(e) = manager.remove_worktree(&unit.chunk, false).await {
            warn!(chunk = %unit.chunk, error = %e, "failed to remove worktree");
        }

        match manager.has_changes(&unit.chunk).await {
            Ok(true) => {
                info!(chunk = %unit.chunk, base = manager.base_branch(), "merging branch to base");
                if let Err(e) = manager.merge_to_base(&unit.chunk, true).await {
                    unit.session_id = None;
                    return self.mark_needs_attention(unit, e.to_string());
                }
            }
            Ok(false) => {
                info!(chunk = %unit.chunk, "no changes, skipping merge");
                if let Err(e) = manager.delete_branch(&unit.chunk).await {
                    warn!(chunk = %unit.chunk, error = %e, "failed to delete empty branch");
                }
            }
            Err(e) => {
                unit.session_id = None;
                return self.mark_needs_attention(unit, e.to_string());
            }
        }

        unit.status = WorkUnitStatus::Done;
        unit.session_id = None;
        unit.worktree = None;
        *unit = self.store.update_work_unit(unit)?;

        self.unblock_dependents(&unit.chunk)?;
        Ok(())
    }

    /// Remove `completed` from every dependent's `blocked_by`; dependents
    /// left with no blockers move BLOCKED → READY.
    fn unblock_dependents(&self, completed: &str) -> ChunkflowResult<()> {
        for mut dependent in self.store.list_blocked_by(completed)? {
            dependent.blocked_by.retain(|c| c != completed);
            if dependent.blocked_by.is_empty()
                && dependent.status == WorkUnitStatus::Blocked
            {
                info!(chunk = %dependent.chunk, blocker = completed, "unblocking work unit");
                dependent.status = WorkUnitStatus::Ready;
            } else {
                debug!(
                    chunk = %dependent.chunk,
                    remaining = ?dependent.blocked_by,
                    "removed completed blocker"
                );
            }
            self.store.update_work_unit(&dependent)?;
        }
        Ok(())
    }

    /// Drop this chunk's stored analyses and cached verdicts; the next tick
    /// runs fresh ones.
    fn reanalyze_conflicts(&self, chunk: &str) -> ChunkflowResult<()> {
        let cleared = self.store.clear_conflicts_for_chunk(chunk)?;
        if cleared > 0 {
            info!(chunk, cleared, "cleared stale conflict analyses");
        }
        if let Some(mut unit) = self.store.get_work_unit(chunk)? {
            unit.conflict_verdicts.clear();
            self.store.update_work_unit(&unit)?;
        }
        Ok(())
    }

    fn mark_needs_attention(&self, unit: &mut WorkUnit, reason: String) -> ChunkflowResult<()> {
        warn!(chunk = %unit.chunk, reason = %reason, "work unit needs attention");
        unit.status = WorkUnitStatus::NeedsAttention;
        unit.attention_reason = Some(reason);
        *unit = self.store.update_work_unit(unit)?;
        Ok(())
    }
}
