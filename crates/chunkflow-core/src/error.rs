use thiserror::Error;

/// A convenience `Result` alias using [`ChunkflowError`].
pub type ChunkflowResult<T> = Result<T, ChunkflowError>;

/// Top-level error type for the Chunkflow orchestrator.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, Error)]
pub enum ChunkflowError {
    /// A chunk artifact is missing or its frontmatter is malformed.
    #[error("Chunk error: {0}")]
    Chunk(String),

    /// Input failed validation (bad identifier, bad enum string, bad body).
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error from the causal artifact index.
    #[error("Index error: {0}")]
    Index(String),

    /// An error from the state store.
    #[error("State error: {0}")]
    State(String),

    /// The requested resource already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The requested resource does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A git worktree operation failed.
    #[error("Worktree error: {0}")]
    Worktree(String),

    /// Merging a chunk branch back to the base branch hit conflicts.
    ///
    /// The merge is left in progress so the operator can resolve the listed
    /// paths and retry via the retry-merge endpoint.
    #[error("Merge to base failed: {message}")]
    MergeConflict {
        /// Git's description of the failure.
        message: String,
        /// Unmerged paths at the time of failure.
        paths: Vec<String>,
    },

    /// An error originating from the agent runtime.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An error from the scheduler dispatch loop.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    /// An error in daemon lifecycle management.
    #[error("Daemon error: {0}")]
    Daemon(String),

    /// An error from an HTTP request against the daemon.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_conflict_display_is_operator_matchable() {
        let err = ChunkflowError::MergeConflict {
            message: "CONFLICT (content): src/lib.rs".to_string(),
            paths: vec!["src/lib.rs".to_string()],
        };
        // The retry-merge endpoint matches on this phrase in attention_reason.
        assert!(err.to_string().to_lowercase().contains("merge to base failed"));
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: ChunkflowError = io.into();
        assert!(matches!(err, ChunkflowError::Io(_)));
    }
}
