use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ChunkflowError;

/// Lifecycle status of a chunk, stored in its GOAL.md frontmatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChunkStatus {
    /// Planned but not started.
    Future,
    /// Currently being worked in a worktree. At most one per worktree.
    Implementing,
    /// Implementation finished and verified.
    Active,
    /// Replaced by a later chunk.
    Superseded,
    /// Terminal archival state.
    Historical,
}

impl ChunkStatus {
    /// Whether a human-driven transition from `self` to `to` is allowed.
    ///
    /// The scheduler additionally performs IMPLEMENTING→FUTURE (activation
    /// displacement) and FUTURE→IMPLEMENTING (restore), which are covered by
    /// [`ChunkStatus::can_displace_to`].
    pub fn can_transition_to(self, to: ChunkStatus) -> bool {
        use ChunkStatus::{Active, Future, Historical, Implementing, Superseded};
        matches!(
            (self, to),
            (Future, Implementing | Historical)
                | (Implementing, Active | Historical)
                | (Active, Superseded | Historical)
                | (Superseded, Historical)
        )
    }

    /// Whether the orchestrator may move `self` to `to` during chunk
    /// activation/restoration in a worktree.
    pub fn can_displace_to(self, to: ChunkStatus) -> bool {
        matches!(
            (self, to),
            (ChunkStatus::Implementing, ChunkStatus::Future)
                | (ChunkStatus::Future, ChunkStatus::Implementing)
        )
    }

    /// Whether chunks with this status are eligible to be causal-index tips.
    pub fn is_tip_eligible(self) -> bool {
        matches!(self, ChunkStatus::Active | ChunkStatus::Implementing)
    }
}

impl fmt::Display for ChunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChunkStatus::Future => "FUTURE",
            ChunkStatus::Implementing => "IMPLEMENTING",
            ChunkStatus::Active => "ACTIVE",
            ChunkStatus::Superseded => "SUPERSEDED",
            ChunkStatus::Historical => "HISTORICAL",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ChunkStatus {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FUTURE" => Ok(ChunkStatus::Future),
            "IMPLEMENTING" => Ok(ChunkStatus::Implementing),
            "ACTIVE" => Ok(ChunkStatus::Active),
            "SUPERSEDED" => Ok(ChunkStatus::Superseded),
            "HISTORICAL" => Ok(ChunkStatus::Historical),
            other => Err(ChunkflowError::Validation(format!(
                "Invalid chunk status: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a narrative (OVERVIEW.md frontmatter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NarrativeStatus {
    /// Being written.
    Drafting,
    /// Current narrative of record.
    Active,
    /// Finished and closed.
    Completed,
}

impl NarrativeStatus {
    /// Only ACTIVE narratives are eligible to be causal-index tips.
    pub fn is_tip_eligible(self) -> bool {
        matches!(self, NarrativeStatus::Active)
    }
}

impl FromStr for NarrativeStatus {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DRAFTING" => Ok(NarrativeStatus::Drafting),
            "ACTIVE" => Ok(NarrativeStatus::Active),
            "COMPLETED" => Ok(NarrativeStatus::Completed),
            other => Err(ChunkflowError::Validation(format!(
                "Invalid narrative status: {other}"
            ))),
        }
    }
}

/// Classification of a bug chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BugType {
    /// The design was wrong.
    Semantic,
    /// The design was right, the code was wrong.
    Implementation,
}

/// The agent phase a work unit is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkUnitPhase {
    /// Refine GOAL.md.
    Goal,
    /// Populate PLAN.md.
    Plan,
    /// Implement the plan.
    Implement,
    /// Run the completion ritual (flip status to ACTIVE).
    Complete,
}

impl WorkUnitPhase {
    /// The phase after this one, or `None` when the unit is finished.
    pub fn next(self) -> Option<WorkUnitPhase> {
        match self {
            WorkUnitPhase::Goal => Some(WorkUnitPhase::Plan),
            WorkUnitPhase::Plan => Some(WorkUnitPhase::Implement),
            WorkUnitPhase::Implement => Some(WorkUnitPhase::Complete),
            WorkUnitPhase::Complete => None,
        }
    }

    /// The skill file under `.claude/commands/` driving this phase.
    pub fn skill_file(self) -> &'static str {
        match self {
            WorkUnitPhase::Goal => "chunk-create.md",
            WorkUnitPhase::Plan => "chunk-plan.md",
            WorkUnitPhase::Implement => "chunk-implement.md",
            WorkUnitPhase::Complete => "chunk-complete.md",
        }
    }
}

impl fmt::Display for WorkUnitPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkUnitPhase::Goal => "GOAL",
            WorkUnitPhase::Plan => "PLAN",
            WorkUnitPhase::Implement => "IMPLEMENT",
            WorkUnitPhase::Complete => "COMPLETE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkUnitPhase {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GOAL" => Ok(WorkUnitPhase::Goal),
            "PLAN" => Ok(WorkUnitPhase::Plan),
            "IMPLEMENT" => Ok(WorkUnitPhase::Implement),
            "COMPLETE" => Ok(WorkUnitPhase::Complete),
            other => Err(ChunkflowError::Validation(format!(
                "Invalid phase: {other}"
            ))),
        }
    }
}

/// Scheduling status of a work unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkUnitStatus {
    /// Eligible for dispatch.
    Ready,
    /// An agent task is executing this unit.
    Running,
    /// Waiting on other chunks in `blocked_by`.
    Blocked,
    /// Waiting on the operator (question, failure, unresolved conflict).
    NeedsAttention,
    /// Terminal: merged to base. Never revisited.
    Done,
}

impl fmt::Display for WorkUnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkUnitStatus::Ready => "READY",
            WorkUnitStatus::Running => "RUNNING",
            WorkUnitStatus::Blocked => "BLOCKED",
            WorkUnitStatus::NeedsAttention => "NEEDS_ATTENTION",
            WorkUnitStatus::Done => "DONE",
        };
        write!(f, "{s}")
    }
}

impl FromStr for WorkUnitStatus {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "READY" => Ok(WorkUnitStatus::Ready),
            "RUNNING" => Ok(WorkUnitStatus::Running),
            "BLOCKED" => Ok(WorkUnitStatus::Blocked),
            "NEEDS_ATTENTION" => Ok(WorkUnitStatus::NeedsAttention),
            "DONE" => Ok(WorkUnitStatus::Done),
            other => Err(ChunkflowError::Validation(format!(
                "Invalid status: {other}"
            ))),
        }
    }
}

/// Verdict of the conflict oracle for a pair of chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictVerdict {
    /// The chunks may run in parallel.
    Independent,
    /// The chunks must not run concurrently.
    Serialize,
    /// The oracle cannot decide; the operator must resolve.
    AskOperator,
}

impl fmt::Display for ConflictVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConflictVerdict::Independent => "INDEPENDENT",
            ConflictVerdict::Serialize => "SERIALIZE",
            ConflictVerdict::AskOperator => "ASK_OPERATOR",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ConflictVerdict {
    type Err = ChunkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INDEPENDENT" => Ok(ConflictVerdict::Independent),
            "SERIALIZE" => Ok(ConflictVerdict::Serialize),
            "ASK_OPERATOR" => Ok(ConflictVerdict::AskOperator),
            other => Err(ChunkflowError::Validation(format!(
                "Invalid verdict: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_verdict_wire_values() {
        assert_eq!(
            serde_json::to_string(&ConflictVerdict::AskOperator).unwrap(),
            "\"ASK_OPERATOR\""
        );
        assert_eq!(
            "SERIALIZE".parse::<ConflictVerdict>().unwrap(),
            ConflictVerdict::Serialize
        );
    }

    #[test]
    fn chunk_status_transitions() {
        assert!(ChunkStatus::Future.can_transition_to(ChunkStatus::Implementing));
        assert!(ChunkStatus::Future.can_transition_to(ChunkStatus::Historical));
        assert!(ChunkStatus::Implementing.can_transition_to(ChunkStatus::Active));
        assert!(ChunkStatus::Active.can_transition_to(ChunkStatus::Superseded));
        assert!(ChunkStatus::Superseded.can_transition_to(ChunkStatus::Historical));

        assert!(!ChunkStatus::Future.can_transition_to(ChunkStatus::Active));
        assert!(!ChunkStatus::Historical.can_transition_to(ChunkStatus::Future));
        assert!(!ChunkStatus::Active.can_transition_to(ChunkStatus::Implementing));
    }

    #[test]
    fn displacement_moves() {
        assert!(ChunkStatus::Implementing.can_displace_to(ChunkStatus::Future));
        assert!(ChunkStatus::Future.can_displace_to(ChunkStatus::Implementing));
        assert!(!ChunkStatus::Active.can_displace_to(ChunkStatus::Future));
    }

    #[test]
    fn phase_progression() {
        assert_eq!(WorkUnitPhase::Goal.next(), Some(WorkUnitPhase::Plan));
        assert_eq!(WorkUnitPhase::Plan.next(), Some(WorkUnitPhase::Implement));
        assert_eq!(WorkUnitPhase::Implement.next(), Some(WorkUnitPhase::Complete));
        assert_eq!(WorkUnitPhase::Complete.next(), None);
    }

    #[test]
    fn serde_wire_values() {
        assert_eq!(
            serde_json::to_string(&WorkUnitStatus::NeedsAttention).unwrap(),
            "\"NEEDS_ATTENTION\""
        );
        assert_eq!(
            serde_json::to_string(&ChunkStatus::Implementing).unwrap(),
            "\"IMPLEMENTING\""
        );
        assert_eq!(
            serde_json::to_string(&WorkUnitPhase::Implement).unwrap(),
            "\"IMPLEMENT\""
        );
        let parsed: WorkUnitStatus = serde_json::from_str("\"NEEDS_ATTENTION\"").unwrap();
        assert_eq!(parsed, WorkUnitStatus::NeedsAttention);
    }

    #[test]
    fn from_str_round_trip() {
        for status in [
            WorkUnitStatus::Ready,
            WorkUnitStatus::Running,
            WorkUnitStatus::Blocked,
            WorkUnitStatus::NeedsAttention,
            WorkUnitStatus::Done,
        ] {
            assert_eq!(status.to_string().parse::<WorkUnitStatus>().unwrap(), status);
        }
        assert!("BOGUS".parse::<WorkUnitStatus>().is_err());
    }

    #[test]
    fn tip_eligibility() {
        assert!(ChunkStatus::Active.is_tip_eligible());
        assert!(ChunkStatus::Implementing.is_tip_eligible());
        assert!(!ChunkStatus::Future.is_tip_eligible());
        assert!(!ChunkStatus::Superseded.is_tip_eligible());
        assert!(NarrativeStatus::Active.is_tip_eligible());
        assert!(!NarrativeStatus::Drafting.is_tip_eligible());
        assert!(!NarrativeStatus::Completed.is_tip_eligible());
    }
}
