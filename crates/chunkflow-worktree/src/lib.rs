//! Git worktree lifecycle for isolated chunk execution.
//!
//! Each running chunk gets its own worktree at `.ve/chunks/<chunk>/worktree`
//! on a branch `chunk/<chunk>` forked from the base branch. Every git
//! invocation that operates inside a worktree pins `GIT_DIR` and
//! `GIT_WORK_TREE` to it, so an escaping `cd` in an agent cannot act on the
//! host repository.

use std::path::{Path, PathBuf};
use std::process::Output;

use tokio::process::Command;
use tracing::{debug, info, warn};

use chunkflow_core::{ChunkflowError, ChunkflowResult};

/// Manages worktrees and chunk branches for one host repository.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    project_dir: PathBuf,
    base_branch: String,
}

impl WorktreeManager {
    /// Create a manager for `project_dir` with the given base branch.
    pub fn new(project_dir: impl Into<PathBuf>, base_branch: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            base_branch: base_branch.into(),
        }
    }

    /// The host repository root.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// The branch chunk branches fork from and merge back to.
    pub fn base_branch(&self) -> &str {
        &self.base_branch
    }

    /// Branch name for a chunk.
    pub fn branch_name(&self, chunk: &str) -> String {
        format!("chunk/{chunk}")
    }

    /// Worktree directory for a chunk.
    pub fn worktree_path(&self, chunk: &str) -> PathBuf {
        self.project_dir
            .join(".ve")
            .join("chunks")
            .join(chunk)
            .join("worktree")
    }

    /// Per-phase agent log directory for a chunk.
    pub fn log_path(&self, chunk: &str) -> PathBuf {
        self.project_dir
            .join(".ve")
            .join("chunks")
            .join(chunk)
            .join("logs")
    }

    async fn git(&self, cwd: &Path, pin_worktree: Option<&Path>, args: &[&str]) -> ChunkflowResult<Output> {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(cwd);
        if let Some(worktree) = pin_worktree {
            cmd.env("GIT_DIR", worktree.join(".git"));
            cmd.env("GIT_WORK_TREE", worktree);
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| ChunkflowError::Worktree(format!("failed to run git: {e}")))?;
        debug!(args = ?args, status = ?output.status.code(), "git");
        Ok(output)
    }

    /// Run git in the host repository.
    async fn git_host(&self, args: &[&str]) -> ChunkflowResult<Output> {
        self.git(&self.project_dir, None, args).await
    }

    /// Run git inside a chunk's worktree with the environment pinned to it.
    async fn git_worktree(&self, chunk: &str, args: &[&str]) -> ChunkflowResult<Output> {
        let worktree = self.worktree_path(chunk);
        self.git(&worktree, Some(&worktree), args).await
    }

    fn require_success(output: Output, what: &str) -> ChunkflowResult<Output> {
        if output.status.success() {
            Ok(output)
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(ChunkflowError::Worktree(format!(
                "{what} failed: {}",
                stderr.trim()
            )))
        }
    }

    /// Whether `branch` exists in the host repository.
    pub async fn branch_exists(&self, branch: &str) -> ChunkflowResult<bool> {
        let output = self
            .git_host(&["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .await?;
        Ok(output.status.success())
    }

    /// Create (or return) the worktree for `chunk`.
    ///
    /// Idempotent: an existing worktree on the expected branch is returned
    /// as-is; an existing worktree on a different branch is an error. The
    /// chunk branch is created from the base branch head when missing.
    pub async fn create_worktree(&self, chunk: &str) -> ChunkflowResult<PathBuf> {
        let path = self.worktree_path(chunk);
        let branch = self.branch_name(chunk);

        if path.is_dir() {
            let output = self
                .git_worktree(chunk, &["rev-parse", "--abbrev-ref", "HEAD"])
                .await?;
            let head = String::from_utf8_lossy(&output.stdout).trim().to_string();
            if output.status.success() && head == branch {
                debug!(chunk, path = %path.display(), "worktree already exists");
                return Ok(path);
            }
            return Err(ChunkflowError::Worktree(format!(
                "worktree for '{chunk}' exists but is on branch '{head}', expected '{branch}'"
            )));
        }

        if !self.branch_exists(&branch).await? {
            let output = self
                .git_host(&["branch", &branch, &self.base_branch])
                .await?;
            Self::require_success(output, &format!("creating branch {branch}"))?;
        }

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().into_owned();
        let output = self
            .git_host(&["worktree", "add", &path_str, &branch])
            .await?;
        Self::require_success(output, &format!("adding worktree for {chunk}"))?;

        info!(chunk, path = %path.display(), branch, "worktree created");
        Ok(path)
    }

    /// Remove the worktree directory, and optionally safe-delete the branch.
    pub async fn remove_worktree(&self, chunk: &str, remove_branch: bool) -> ChunkflowResult<()> {
        let path = self.worktree_path(chunk);
        let path_str = path.to_string_lossy().into_owned();

        let output = self
            .git_host(&["worktree", "remove", "--force", &path_str])
            .await?;
        if !output.status.success() {
            // A half-created or manually mangled worktree dir: remove it on
            // disk and let git forget the registration.
            if path.exists() {
                std::fs::remove_dir_all(&path)?;
            }
            let _ = self.git_host(&["worktree", "prune"]).await;
        }

        if remove_branch {
            self.delete_branch(chunk).await?;
        }
        info!(chunk, "worktree removed");
        Ok(())
    }

    /// Safe-delete (`-d`) the chunk branch if it exists.
    ///
    /// Fails when the branch is unmerged, which is intentional: unmerged work
    /// must go through [`WorktreeManager::merge_to_base`].
    pub async fn delete_branch(&self, chunk: &str) -> ChunkflowResult<()> {
        let branch = self.branch_name(chunk);
        if !self.branch_exists(&branch).await? {
            return Ok(());
        }
        let output = self.git_host(&["branch", "-d", &branch]).await?;
        Self::require_success(output, &format!("deleting branch {branch}"))?;
        Ok(())
    }

    /// `git status --porcelain` in the worktree is non-empty.
    pub async fn has_uncommitted_changes(&self, chunk: &str) -> ChunkflowResult<bool> {
        let output = self
            .git_worktree(chunk, &["status", "--porcelain"])
            .await?;
        let output = Self::require_success(output, "checking worktree status")?;
        Ok(!output.stdout.is_empty())
    }

    /// Stage everything and make a mechanical commit.
    ///
    /// Returns `false` when there was nothing to commit.
    pub async fn commit_changes(&self, chunk: &str) -> ChunkflowResult<bool> {
        let output = self.git_worktree(chunk, &["add", "-A"]).await?;
        Self::require_success(output, "staging changes")?;

        let staged = self
            .git_worktree(chunk, &["diff", "--cached", "--quiet"])
            .await?;
        if staged.status.success() {
            return Ok(false);
        }

        let message = format!("chore(chunk): {chunk} phase work");
        let output = self
            .git_worktree(chunk, &["commit", "-m", &message])
            .await?;
        Self::require_success(output, "committing changes")?;
        info!(chunk, "mechanical commit created");
        Ok(true)
    }

    /// Whether the chunk branch is ahead of the base branch.
    pub async fn has_changes(&self, chunk: &str) -> ChunkflowResult<bool> {
        let branch = self.branch_name(chunk);
        let range = format!("{}..{branch}", self.base_branch);
        let output = self.git_host(&["rev-list", "--count", &range]).await?;
        let output = Self::require_success(output, "counting branch commits")?;
        let count: u64 = String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .unwrap_or(0);
        Ok(count > 0)
    }

    /// Merge the chunk branch into the base branch.
    ///
    /// Fast-forward when possible, merge commit otherwise. On conflict the
    /// merge is left in progress and a [`ChunkflowError::MergeConflict`]
    /// carries the unmerged paths so the operator can resolve and retry.
    pub async fn merge_to_base(&self, chunk: &str, delete_branch: bool) -> ChunkflowResult<()> {
        let branch = self.branch_name(chunk);

        let output = self.git_host(&["checkout", &self.base_branch]).await?;
        Self::require_success(output, &format!("checking out {}", self.base_branch))?;

        let output = self.git_host(&["merge", "--no-edit", &branch]).await?;
        if !output.status.success() {
            let message = {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stdout = String::from_utf8_lossy(&output.stdout);
                let combined = format!("{} {}", stdout.trim(), stderr.trim());
                combined.trim().to_string()
            };

            let unmerged = self
                .git_host(&["diff", "--name-only", "--diff-filter=U"])
                .await?;
            let paths: Vec<String> = String::from_utf8_lossy(&unmerged.stdout)
                .lines()
                .map(str::to_string)
                .collect();

            warn!(chunk, ?paths, "merge to base failed");
            return Err(ChunkflowError::MergeConflict { message, paths });
        }

        info!(chunk, base = %self.base_branch, "merged to base");
        if delete_branch {
            self.delete_branch(chunk).await?;
        }
        Ok(())
    }

    /// On-disk worktree directories under `.ve/chunks/`, by chunk name.
    ///
    /// The scheduler's recovery path removes any that no longer belong to a
    /// RUNNING work unit.
    pub fn list_worktree_dirs(&self) -> Vec<String> {
        let chunks_root = self.project_dir.join(".ve").join("chunks");
        let Ok(entries) = std::fs::read_dir(&chunks_root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().join("worktree").is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }
}
