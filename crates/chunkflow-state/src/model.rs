use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use chunkflow_core::{ConflictVerdict, WorkUnitPhase, WorkUnitStatus};

/// The orchestrator's runtime handle on a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// The chunk this unit drives. One work unit per chunk.
    pub chunk: String,
    /// Current agent phase.
    pub phase: WorkUnitPhase,
    /// Scheduling status.
    pub status: WorkUnitStatus,
    /// Ready-queue priority, descending.
    #[serde(default)]
    pub priority: i64,
    /// Chunks that must reach DONE before this unit may run.
    #[serde(default)]
    pub blocked_by: Vec<String>,
    /// Worktree path while RUNNING.
    #[serde(default)]
    pub worktree: Option<String>,
    /// Last agent session id, kept for resume.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Operator answer to inject on the next dispatch. One-shot.
    #[serde(default)]
    pub pending_answer: Option<String>,
    /// Why the unit is NEEDS_ATTENTION, for the operator.
    #[serde(default)]
    pub attention_reason: Option<String>,
    /// Cached oracle verdicts against other chunks.
    #[serde(default)]
    pub conflict_verdicts: BTreeMap<String, ConflictVerdict>,
    /// Operator override replacing cached verdicts for this unit.
    #[serde(default)]
    pub conflict_override: Option<ConflictVerdict>,
    /// Chunk demoted from IMPLEMENTING so this one could run; restored
    /// before merge.
    #[serde(default)]
    pub displaced_chunk: Option<String>,
    /// Completion-retry count, bounded by `max_completion_retries`.
    #[serde(default)]
    pub completion_retries: u32,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last-modification instant.
    pub updated_at: DateTime<Utc>,
}

impl WorkUnit {
    /// A fresh READY work unit for `chunk` starting at `phase`.
    pub fn new(chunk: impl Into<String>, phase: WorkUnitPhase) -> Self {
        let now = Utc::now();
        Self {
            chunk: chunk.into(),
            phase,
            status: WorkUnitStatus::Ready,
            priority: 0,
            blocked_by: Vec::new(),
            worktree: None,
            session_id: None,
            pending_answer: None,
            attention_reason: None,
            conflict_verdicts: BTreeMap::new(),
            conflict_override: None,
            displaced_chunk: None,
            completion_retries: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder-style priority override.
    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}

/// One row of the append-only status-transition history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusTransition {
    /// The chunk whose unit transitioned.
    pub chunk: String,
    /// Previous status; `None` on creation.
    pub old_status: Option<WorkUnitStatus>,
    /// New status.
    pub new_status: WorkUnitStatus,
    /// Transition instant.
    pub at: DateTime<Utc>,
}

/// A NEEDS_ATTENTION unit enriched for the attention queue.
#[derive(Debug, Clone, Serialize)]
pub struct AttentionItem {
    /// The work unit itself, flattened into the payload.
    #[serde(flatten)]
    pub unit: WorkUnit,
    /// How many other units are blocked on this chunk.
    pub blocks_count: i64,
    /// Seconds since the unit last changed.
    pub time_waiting: f64,
    /// First 200 chars of the GOAL.md Minor Goal section, when readable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal_summary: Option<String>,
}

/// Canonical ordering for a conflict pair: `chunk_a < chunk_b`.
pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// A cached oracle verdict for a canonical chunk pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictAnalysis {
    /// Lexicographically smaller chunk of the pair.
    pub chunk_a: String,
    /// Lexicographically larger chunk of the pair.
    pub chunk_b: String,
    /// The verdict.
    pub verdict: ConflictVerdict,
    /// Human-readable explanation.
    pub reason: String,
    /// Analysis instant.
    pub created_at: DateTime<Utc>,
}

impl ConflictAnalysis {
    /// Build an analysis, canonicalising the pair order.
    pub fn new(
        a: &str,
        b: &str,
        verdict: ConflictVerdict,
        reason: impl Into<String>,
    ) -> Self {
        let (chunk_a, chunk_b) = canonical_pair(a, b);
        Self {
            chunk_a,
            chunk_b,
            verdict,
            reason: reason.into(),
            created_at: Utc::now(),
        }
    }

    /// Whether this analysis involves `chunk`.
    pub fn involves(&self, chunk: &str) -> bool {
        self.chunk_a == chunk || self.chunk_b == chunk
    }

    /// The other chunk of the pair, if `chunk` is one of them.
    pub fn other(&self, chunk: &str) -> Option<&str> {
        if self.chunk_a == chunk {
            Some(&self.chunk_b)
        } else if self.chunk_b == chunk {
            Some(&self.chunk_a)
        } else {
            None
        }
    }
}

fn default_max_agents() -> usize {
    2
}
fn default_dispatch_interval() -> f64 {
    1.0
}
fn default_max_completion_retries() -> u32 {
    3
}
fn default_base_branch() -> String {
    "main".to_string()
}
fn default_shutdown_timeout() -> u64 {
    30
}

/// Daemon configuration, persisted in the config table key by key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on concurrently running agents.
    #[serde(default = "default_max_agents")]
    pub max_agents: usize,
    /// Seconds between dispatch ticks.
    #[serde(default = "default_dispatch_interval")]
    pub dispatch_interval_seconds: f64,
    /// How many times to resume an agent that left the chunk IMPLEMENTING.
    #[serde(default = "default_max_completion_retries")]
    pub max_completion_retries: u32,
    /// Branch chunk branches fork from and merge back to.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Graceful-shutdown wait for running agents, in seconds.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_agents: default_max_agents(),
            dispatch_interval_seconds: default_dispatch_interval(),
            max_completion_retries: default_max_completion_retries(),
            base_branch: default_base_branch(),
            shutdown_timeout_seconds: default_shutdown_timeout(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_work_unit_defaults() {
        let unit = WorkUnit::new("feature", WorkUnitPhase::Implement);
        assert_eq!(unit.status, WorkUnitStatus::Ready);
        assert_eq!(unit.priority, 0);
        assert!(unit.blocked_by.is_empty());
        assert!(unit.conflict_verdicts.is_empty());
        assert_eq!(unit.completion_retries, 0);
    }

    #[test]
    fn canonical_pair_orders_lexicographically() {
        assert_eq!(
            canonical_pair("zeta", "alpha"),
            ("alpha".to_string(), "zeta".to_string())
        );
        assert_eq!(
            canonical_pair("alpha", "zeta"),
            ("alpha".to_string(), "zeta".to_string())
        );
    }

    #[test]
    fn conflict_analysis_other() {
        let analysis =
            ConflictAnalysis::new("b_chunk", "a_chunk", ConflictVerdict::Serialize, "why");
        assert_eq!(analysis.chunk_a, "a_chunk");
        assert_eq!(analysis.other("a_chunk"), Some("b_chunk"));
        assert_eq!(analysis.other("b_chunk"), Some("a_chunk"));
        assert_eq!(analysis.other("c_chunk"), None);
    }

    #[test]
    fn config_defaults() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.max_agents, 2);
        assert!((config.dispatch_interval_seconds - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.max_completion_retries, 3);
        assert_eq!(config.base_branch, "main");
        assert_eq!(config.shutdown_timeout_seconds, 30);
    }

    #[test]
    fn work_unit_serializes_wire_shape() {
        let unit = WorkUnit::new("feature", WorkUnitPhase::Goal);
        let json = serde_json::to_value(&unit).unwrap();
        assert_eq!(json["chunk"], "feature");
        assert_eq!(json["phase"], "GOAL");
        assert_eq!(json["status"], "READY");
    }
}
