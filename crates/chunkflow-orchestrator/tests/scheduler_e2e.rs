#![allow(clippy::unwrap_used, clippy::expect_used)]

//! End-to-end scheduler tests against a real git repository and a scripted
//! agent runtime. The mock agent performs the completion ritual (flipping the
//! IMPLEMENTING chunk to ACTIVE) when it receives the chunk-complete skill,
//! and otherwise completes without touching the tree.

use std::fs;
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use chunkflow_agent::{
    AgentInvocation, AgentRuntime, EventSink, HookSet, RuntimeEvent, RuntimeRun,
};
use chunkflow_core::{ChunkStatus, Chunks, ChunkflowResult, WorkUnitPhase, WorkUnitStatus};
use chunkflow_orchestrator::Scheduler;
use chunkflow_state::{StateStore, WorkUnit};
use chunkflow_worktree::WorktreeManager;

/// Agent stand-in: completes every phase; on the COMPLETE skill it flips the
/// currently IMPLEMENTING chunk to ACTIVE, and optionally writes a payload
/// file to provoke merge conflicts.
struct ScriptedAgent {
    write_on_complete: Option<(String, String)>,
}

impl ScriptedAgent {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            write_on_complete: None,
        })
    }

    fn writing(path: &str, content: &str) -> Arc<Self> {
        Arc::new(Self {
            write_on_complete: Some((path.to_string(), content.to_string())),
        })
    }
}

#[async_trait]
impl AgentRuntime for ScriptedAgent {
    async fn run(
        &self,
        invocation: AgentInvocation,
        _hooks: &HookSet,
        on_event: &EventSink,
    ) -> ChunkflowResult<RuntimeRun> {
        on_event(&RuntimeEvent::Init {
            session_id: "scripted-session".to_string(),
        });

        if invocation.prompt.contains("Complete the chunk.") {
            let chunks = Chunks::new(&invocation.cwd);
            if let Some(current) = chunks.current_implementing() {
                chunks.set_status(&current, ChunkStatus::Active)?;
            }
            if let Some((path, content)) = &self.write_on_complete {
                fs::write(invocation.cwd.join(path), content)?;
            }
        }

        on_event(&RuntimeEvent::Result {
            is_error: false,
            result: Some("done".to_string()),
        });
        Ok(RuntimeRun {
            session_id: Some("scripted-session".to_string()),
            completed: true,
            error: None,
            stopped_by_hook: None,
        })
    }
}

fn sh(dir: &Path, args: &[&str]) {
    let output = Command::new(args[0])
        .args(&args[1..])
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "command {args:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn write_chunk(
    root: &Path,
    name: &str,
    status: &str,
    refs: &[&str],
    created_after: &[&str],
) {
    let dir = root.join("docs").join("chunks").join(name);
    fs::create_dir_all(&dir).unwrap();
    let refs_yaml: String = refs
        .iter()
        .map(|r| format!("\n  - ref: \"{r}\"\n    implements: \"x\""))
        .collect();
    let ca_yaml: String = created_after
        .iter()
        .map(|c| format!("\n  - \"{c}\""))
        .collect();
    fs::write(
        dir.join("GOAL.md"),
        format!(
            "---\nstatus: {status}\ncreated_after: {}\ncode_references: {}\n---\n# Goal\n\n## Minor Goal\n\nDo the {name} work.\n",
            if created_after.is_empty() { "[]".to_string() } else { ca_yaml },
            if refs.is_empty() { "[]".to_string() } else { refs_yaml },
        ),
    )
    .unwrap();
    fs::write(
        dir.join("PLAN.md"),
        "# Plan\n\n## Approach\n\nA real plan with content.\n",
    )
    .unwrap();
}

fn write_skills(root: &Path) {
    let dir = root.join(".claude").join("commands");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("chunk-create.md"), "Create the chunk. $ARGUMENTS\n").unwrap();
    fs::write(dir.join("chunk-plan.md"), "Plan the chunk.\n").unwrap();
    fs::write(dir.join("chunk-implement.md"), "Implement the plan.\n").unwrap();
    fs::write(dir.join("chunk-complete.md"), "Complete the chunk.\n").unwrap();
}

fn init_project(root: &Path) {
    sh(root, &["git", "init", "-b", "main"]);
    sh(root, &["git", "config", "user.email", "test@test.invalid"]);
    sh(root, &["git", "config", "user.name", "Test"]);
    write_skills(root);
    fs::write(root.join("README.md"), "# project\n").unwrap();
}

fn commit_all(root: &Path, message: &str) {
    sh(root, &["git", "add", "-A"]);
    sh(root, &["git", "commit", "-m", message]);
}

async fn wait_for_status(
    store: &StateStore,
    chunk: &str,
    wanted: WorkUnitStatus,
    timeout: Duration,
) -> WorkUnit {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let unit = store.get_work_unit(chunk).unwrap().unwrap();
        if unit.status == wanted {
            return unit;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {chunk} to reach {wanted}; currently {:?} ({:?})",
            unit.status,
            unit.attention_reason
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn single_chunk_runs_to_done_and_unblocks_dependent() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    write_chunk(tmp.path(), "feature", "IMPLEMENTING", &["src/a.rs#Alpha"], &[]);
    write_chunk(tmp.path(), "dependent", "FUTURE", &["src/b.rs#Beta"], &[]);
    commit_all(tmp.path(), "seed chunks");

    let store = Arc::new(StateStore::in_memory().unwrap());
    store.set_config("dispatch_interval_seconds", "0.05").unwrap();

    store
        .create_work_unit(&WorkUnit::new("feature", WorkUnitPhase::Implement))
        .unwrap();
    let mut blocked = WorkUnit::new("dependent", WorkUnitPhase::Implement);
    blocked.status = WorkUnitStatus::Blocked;
    blocked.blocked_by = vec!["feature".to_string()];
    store.create_work_unit(&blocked).unwrap();

    let scheduler = Scheduler::new(tmp.path(), store.clone(), ScriptedAgent::new());
    let loop_handle = tokio::spawn(Arc::clone(&scheduler).run());

    let done = wait_for_status(&store, "feature", WorkUnitStatus::Done, Duration::from_secs(20)).await;
    assert_eq!(done.session_id, None);
    assert_eq!(done.worktree, None);

    // The dependent was unblocked and driven all the way to DONE too.
    let dependent =
        wait_for_status(&store, "dependent", WorkUnitStatus::Done, Duration::from_secs(20)).await;
    assert!(dependent.blocked_by.is_empty());

    scheduler.stop().await;
    loop_handle.abort();

    // The merge landed both chunks as ACTIVE on the base branch.
    let chunks = Chunks::new(tmp.path());
    assert_eq!(chunks.status("feature").unwrap(), Some(ChunkStatus::Active));
    assert_eq!(chunks.status("dependent").unwrap(), Some(ChunkStatus::Active));

    // No worktrees or chunk branches left behind.
    let manager = WorktreeManager::new(tmp.path(), "main");
    assert!(manager.list_worktree_dirs().is_empty());
    assert!(!manager.branch_exists("chunk/feature").await.unwrap());
    assert!(!manager.branch_exists("chunk/dependent").await.unwrap());

    // History is totally ordered per chunk with one row per transition.
    let history = store.get_status_history("feature").unwrap();
    assert_eq!(history[0].old_status, None);
    let statuses: Vec<_> = history.iter().map(|t| t.new_status).collect();
    assert_eq!(*statuses.last().unwrap(), WorkUnitStatus::Done);
}

#[tokio::test]
async fn unresolved_conflict_with_running_peer_needs_attention() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    // Both chunks target the same symbol, neither is the other's ancestor.
    write_chunk(tmp.path(), "chunk_a", "IMPLEMENTING", &["src/foo.py#Bar"], &[]);
    write_chunk(tmp.path(), "chunk_b", "FUTURE", &["src/foo.py#Bar"], &[]);
    commit_all(tmp.path(), "seed chunks");

    let store = Arc::new(StateStore::in_memory().unwrap());

    let mut running = WorkUnit::new("chunk_a", WorkUnitPhase::Implement);
    running.status = WorkUnitStatus::Running;
    running.worktree = Some("/elsewhere".to_string());
    store.create_work_unit(&running).unwrap();
    store
        .create_work_unit(&WorkUnit::new("chunk_b", WorkUnitPhase::Implement))
        .unwrap();

    let scheduler = Scheduler::new(tmp.path(), store.clone(), ScriptedAgent::new());
    Arc::clone(&scheduler).dispatch_tick().await.unwrap();

    let parked = store.get_work_unit("chunk_b").unwrap().unwrap();
    assert_eq!(parked.status, WorkUnitStatus::NeedsAttention);
    assert!(parked
        .attention_reason
        .as_deref()
        .unwrap()
        .contains("Unresolved conflict with running chunk_a"));
    assert_eq!(parked.blocked_by, vec!["chunk_a".to_string()]);

    // The verdict is cached on both sides.
    let peer = store.get_work_unit("chunk_a").unwrap().unwrap();
    assert!(peer.conflict_verdicts.contains_key("chunk_b"));
}

#[tokio::test]
async fn serialize_verdict_blocks_behind_running_ancestor() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    write_chunk(tmp.path(), "parent", "IMPLEMENTING", &["src/foo.py#Bar"], &[]);
    write_chunk(
        tmp.path(),
        "child",
        "FUTURE",
        &["src/foo.py#Bar"],
        &["parent"],
    );
    commit_all(tmp.path(), "seed chunks");

    let store = Arc::new(StateStore::in_memory().unwrap());
    let mut running = WorkUnit::new("parent", WorkUnitPhase::Implement);
    running.status = WorkUnitStatus::Running;
    running.worktree = Some("/elsewhere".to_string());
    store.create_work_unit(&running).unwrap();
    store
        .create_work_unit(&WorkUnit::new("child", WorkUnitPhase::Implement))
        .unwrap();

    let scheduler = Scheduler::new(tmp.path(), store.clone(), ScriptedAgent::new());
    Arc::clone(&scheduler).dispatch_tick().await.unwrap();

    let child = store.get_work_unit("child").unwrap().unwrap();
    assert_eq!(child.status, WorkUnitStatus::Blocked);
    assert_eq!(child.blocked_by, vec!["parent".to_string()]);
}

#[tokio::test]
async fn crash_recovery_resets_running_units_and_sweeps_worktrees() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    write_chunk(tmp.path(), "stale", "IMPLEMENTING", &[], &[]);
    commit_all(tmp.path(), "seed chunk");

    let manager = WorktreeManager::new(tmp.path(), "main");
    let worktree = manager.create_worktree("stale").await.unwrap();

    let store = Arc::new(StateStore::in_memory().unwrap());
    let mut unit = WorkUnit::new("stale", WorkUnitPhase::Implement);
    unit.status = WorkUnitStatus::Running;
    unit.worktree = Some(worktree.display().to_string());
    store.create_work_unit(&unit).unwrap();

    let scheduler = Scheduler::new(tmp.path(), store.clone(), ScriptedAgent::new());
    scheduler.recover().await.unwrap();

    let recovered = store.get_work_unit("stale").unwrap().unwrap();
    assert_eq!(recovered.status, WorkUnitStatus::Ready);
    assert_eq!(recovered.worktree, None);
    assert!(manager.list_worktree_dirs().is_empty());
}

#[tokio::test]
async fn merge_failure_parks_unit_for_retry() {
    let tmp = tempfile::tempdir().unwrap();
    init_project(tmp.path());
    write_chunk(tmp.path(), "conflicted", "IMPLEMENTING", &[], &[]);
    fs::write(tmp.path().join("shared.txt"), "original\n").unwrap();
    commit_all(tmp.path(), "seed chunk");

    // Fork the chunk branch now, then move the base so the merge conflicts.
    let manager = WorktreeManager::new(tmp.path(), "main");
    manager.create_worktree("conflicted").await.unwrap();
    fs::write(tmp.path().join("shared.txt"), "base edit\n").unwrap();
    commit_all(tmp.path(), "base moves on");

    let store = Arc::new(StateStore::in_memory().unwrap());
    store.set_config("dispatch_interval_seconds", "0.05").unwrap();
    store
        .create_work_unit(&WorkUnit::new("conflicted", WorkUnitPhase::Complete))
        .unwrap();

    let agent = ScriptedAgent::writing("shared.txt", "agent edit\n");
    let scheduler = Scheduler::new(tmp.path(), store.clone(), agent);
    let loop_handle = tokio::spawn(Arc::clone(&scheduler).run());

    let parked = wait_for_status(
        &store,
        "conflicted",
        WorkUnitStatus::NeedsAttention,
        Duration::from_secs(20),
    )
    .await;

    scheduler.stop().await;
    loop_handle.abort();

    let reason = parked.attention_reason.unwrap().to_lowercase();
    assert!(reason.contains("merge to base failed"), "{reason}");
    assert_eq!(parked.session_id, None);
}
