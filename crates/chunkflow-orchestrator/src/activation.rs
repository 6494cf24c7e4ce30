//! Chunk activation inside a worktree.
//!
//! The worktree must hold at most one IMPLEMENTING chunk. Activating the
//! target chunk demotes any other IMPLEMENTING chunk to FUTURE (recorded as
//! the *displaced* chunk) and promotes the target from FUTURE. The displaced
//! chunk is restored before merge so the operator's manually active chunk
//! survives the orchestrator's run.

use std::path::Path;

use tracing::{info, warn};

use chunkflow_core::{ChunkStatus, Chunks, ChunkflowError, ChunkflowResult};

/// Activate `target` in the worktree, displacing any other IMPLEMENTING chunk.
///
/// Returns the displaced chunk name, if one was demoted. A target already
/// IMPLEMENTING is a no-op; a target in any status other than FUTURE or
/// IMPLEMENTING is an error.
pub fn activate_chunk(worktree: &Path, target: &str) -> ChunkflowResult<Option<String>> {
    let chunks = Chunks::new(worktree);

    let frontmatter = chunks.frontmatter(target)?.ok_or_else(|| {
        ChunkflowError::Chunk(format!("chunk '{target}' not found in worktree"))
    })?;

    match frontmatter.status {
        ChunkStatus::Implementing => {
            info!(chunk = target, "chunk already IMPLEMENTING, no activation needed");
            Ok(None)
        }
        ChunkStatus::Future => {
            let displaced = chunks
                .current_implementing()
                .filter(|current| current != target);
            if let Some(current) = &displaced {
                info!(displaced = %current, "displacing IMPLEMENTING chunk to FUTURE");
                chunks.set_status(current, ChunkStatus::Future)?;
            }
            info!(chunk = target, "activating chunk (FUTURE -> IMPLEMENTING)");
            chunks.set_status(target, ChunkStatus::Implementing)?;
            Ok(displaced)
        }
        other => Err(ChunkflowError::Validation(format!(
            "chunk '{target}' has status '{other}', expected 'FUTURE' for activation"
        ))),
    }
}

/// Restore a displaced chunk back to IMPLEMENTING.
///
/// Best-effort: a missing chunk or an unexpected status logs a warning and
/// leaves the tree untouched.
pub fn restore_displaced_chunk(worktree: &Path, displaced: &str) {
    let chunks = Chunks::new(worktree);

    let status = match chunks.status(displaced) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!(chunk = displaced, "cannot restore displaced chunk: not found");
            return;
        }
        Err(e) => {
            warn!(chunk = displaced, error = %e, "cannot restore displaced chunk");
            return;
        }
    };

    if status != ChunkStatus::Future {
        warn!(
            chunk = displaced,
            %status,
            "cannot restore displaced chunk: expected FUTURE"
        );
        return;
    }

    info!(chunk = displaced, "restoring displaced chunk to IMPLEMENTING");
    if let Err(e) = chunks.set_status(displaced, ChunkStatus::Implementing) {
        warn!(chunk = displaced, error = %e, "failed to restore displaced chunk");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_chunk(root: &Path, name: &str, status: &str) {
        let dir = root.join("docs").join("chunks").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("GOAL.md"),
            format!("---\nstatus: {status}\ncreated_after: []\n---\n# Goal\n"),
        )
        .unwrap();
    }

    fn status_of(root: &Path, chunk: &str) -> ChunkStatus {
        Chunks::new(root).status(chunk).unwrap().unwrap()
    }

    #[test]
    fn activates_future_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "target", "FUTURE");

        let displaced = activate_chunk(tmp.path(), "target").unwrap();
        assert_eq!(displaced, None);
        assert_eq!(status_of(tmp.path(), "target"), ChunkStatus::Implementing);
    }

    #[test]
    fn displaces_existing_implementing_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "target", "FUTURE");
        write_chunk(tmp.path(), "incumbent", "IMPLEMENTING");

        let displaced = activate_chunk(tmp.path(), "target").unwrap();
        assert_eq!(displaced.as_deref(), Some("incumbent"));
        assert_eq!(status_of(tmp.path(), "incumbent"), ChunkStatus::Future);
        assert_eq!(status_of(tmp.path(), "target"), ChunkStatus::Implementing);
    }

    #[test]
    fn already_implementing_is_a_noop() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "target", "IMPLEMENTING");

        let displaced = activate_chunk(tmp.path(), "target").unwrap();
        assert_eq!(displaced, None);
        assert_eq!(status_of(tmp.path(), "target"), ChunkStatus::Implementing);
    }

    #[test]
    fn other_statuses_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "done", "ACTIVE");
        assert!(activate_chunk(tmp.path(), "done").is_err());

        assert!(activate_chunk(tmp.path(), "missing").is_err());
    }

    #[test]
    fn restore_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "target", "FUTURE");
        write_chunk(tmp.path(), "incumbent", "IMPLEMENTING");

        let displaced = activate_chunk(tmp.path(), "target").unwrap().unwrap();
        restore_displaced_chunk(tmp.path(), &displaced);
        assert_eq!(status_of(tmp.path(), "incumbent"), ChunkStatus::Implementing);
    }

    #[test]
    fn restore_refuses_unexpected_status() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "other", "ACTIVE");
        // Must not flip an ACTIVE chunk back to IMPLEMENTING.
        restore_displaced_chunk(tmp.path(), "other");
        assert_eq!(status_of(tmp.path(), "other"), ChunkStatus::Active);
    }
}
