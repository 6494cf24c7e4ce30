use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ChunkflowError, ChunkflowResult};
use crate::frontmatter::{parse_document, render_document, ChunkFrontmatter, Document};
use crate::status::{ChunkStatus, WorkUnitPhase};

/// Outcome of validating a chunk for injection into the work pool.
#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    /// Hard failures; injection is rejected when non-empty.
    pub errors: Vec<String>,
    /// Advisory notes returned to the caller.
    pub warnings: Vec<String>,
}

impl ValidationOutcome {
    /// Whether the chunk may be injected.
    pub fn success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Accessor for the chunk artifact directories under `docs/chunks/`.
#[derive(Debug, Clone)]
pub struct Chunks {
    project_dir: PathBuf,
}

impl Chunks {
    /// Create an accessor rooted at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// The project root this accessor is bound to.
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// `docs/chunks` under the project root.
    pub fn chunks_dir(&self) -> PathBuf {
        self.project_dir.join("docs").join("chunks")
    }

    /// Directory of a specific chunk.
    pub fn chunk_dir(&self, chunk: &str) -> PathBuf {
        self.chunks_dir().join(chunk)
    }

    /// Path to a chunk's GOAL.md.
    pub fn goal_path(&self, chunk: &str) -> PathBuf {
        self.chunk_dir(chunk).join("GOAL.md")
    }

    /// Path to a chunk's PLAN.md.
    pub fn plan_path(&self, chunk: &str) -> PathBuf {
        self.chunk_dir(chunk).join("PLAN.md")
    }

    /// Whether the chunk directory exists.
    pub fn exists(&self, chunk: &str) -> bool {
        self.chunk_dir(chunk).is_dir()
    }

    /// Sorted list of chunk directory names.
    pub fn list(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(self.chunks_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    /// Parse a chunk's GOAL.md document.
    ///
    /// `Ok(None)` when the chunk or its GOAL.md does not exist; `Err` when the
    /// file exists but cannot be parsed.
    pub fn goal_document(&self, chunk: &str) -> ChunkflowResult<Option<Document<ChunkFrontmatter>>> {
        let path = self.goal_path(chunk);
        if !path.is_file() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)?;
        parse_document(&raw).map(Some)
    }

    /// Parse a chunk's frontmatter.
    pub fn frontmatter(&self, chunk: &str) -> ChunkflowResult<Option<ChunkFrontmatter>> {
        Ok(self.goal_document(chunk)?.map(|d| d.frontmatter))
    }

    /// The chunk's lifecycle status, if readable.
    pub fn status(&self, chunk: &str) -> ChunkflowResult<Option<ChunkStatus>> {
        Ok(self.frontmatter(chunk)?.map(|f| f.status))
    }

    /// Rewrite a chunk's GOAL.md with a new status.
    ///
    /// Load → mutate typed model → serialize, so key order stays canonical.
    /// Transition legality is the caller's concern (the scheduler performs
    /// displacement moves ordinary workflows would reject).
    pub fn set_status(&self, chunk: &str, status: ChunkStatus) -> ChunkflowResult<()> {
        let mut doc = self.goal_document(chunk)?.ok_or_else(|| {
            ChunkflowError::Chunk(format!("chunk '{chunk}' not found or GOAL.md missing"))
        })?;
        doc.frontmatter.status = status;
        let rendered = render_document(&doc)?;
        std::fs::write(self.goal_path(chunk), rendered)?;
        Ok(())
    }

    /// The chunk currently IMPLEMENTING, if exactly such a chunk exists.
    ///
    /// Chunks with unreadable frontmatter are skipped.
    pub fn current_implementing(&self) -> Option<String> {
        self.list().into_iter().find(|chunk| {
            matches!(
                self.status(chunk),
                Ok(Some(ChunkStatus::Implementing))
            )
        })
    }

    /// First 200 characters of the GOAL.md `## Minor Goal` section.
    pub fn goal_summary(&self, chunk: &str) -> Option<String> {
        let raw = std::fs::read_to_string(self.goal_path(chunk)).ok()?;
        let text = section_text(&raw, "## Minor Goal")?;
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if text.chars().count() > 200 {
            let prefix: String = text.chars().take(197).collect();
            Some(format!("{prefix}..."))
        } else {
            Some(text.to_string())
        }
    }

    /// Validate that a chunk is ready for injection into the work pool.
    ///
    /// Checks existence, frontmatter parseability, and status-content
    /// consistency: IMPLEMENTING/ACTIVE require a populated PLAN.md, FUTURE
    /// may have an empty plan (warning), SUPERSEDED/HISTORICAL are rejected.
    pub fn validate_injectable(&self, chunk: &str) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        if !self.exists(chunk) {
            outcome.errors.push(format!("Chunk '{chunk}' not found"));
            return outcome;
        }

        let frontmatter = match self.frontmatter(chunk) {
            Ok(Some(f)) => f,
            Ok(None) => {
                outcome
                    .errors
                    .push(format!("Chunk '{chunk}' has no GOAL.md"));
                return outcome;
            }
            Err(e) => {
                outcome
                    .errors
                    .push(format!("Could not parse frontmatter for chunk '{chunk}': {e}"));
                return outcome;
            }
        };

        let plan_populated = plan_has_content(&self.plan_path(chunk));

        match frontmatter.status {
            ChunkStatus::Implementing | ChunkStatus::Active => {
                if !plan_populated {
                    outcome.errors.push(format!(
                        "Chunk has status '{}' but PLAN.md has no content (only template). \
                         Populate the plan or change status to FUTURE.",
                        frontmatter.status
                    ));
                }
            }
            ChunkStatus::Future => {
                if !plan_populated {
                    outcome.warnings.push(
                        "Chunk has status 'FUTURE' with empty plan. \
                         Will start with PLAN phase to populate the plan."
                            .to_string(),
                    );
                }
            }
            ChunkStatus::Superseded | ChunkStatus::Historical => {
                outcome.errors.push(format!(
                    "Chunk has terminal status '{}' and cannot be injected. \
                     Only FUTURE, IMPLEMENTING, or ACTIVE chunks can be injected.",
                    frontmatter.status
                ));
            }
        }

        outcome
    }

    /// Detect the phase an injected work unit should start from.
    ///
    /// No GOAL.md → GOAL; FUTURE/IMPLEMENTING with empty PLAN.md → PLAN;
    /// populated PLAN.md → IMPLEMENT; otherwise PLAN.
    pub fn detect_initial_phase(&self, chunk: &str) -> WorkUnitPhase {
        if !self.goal_path(chunk).is_file() {
            return WorkUnitPhase::Goal;
        }

        if plan_has_content(&self.plan_path(chunk)) {
            WorkUnitPhase::Implement
        } else {
            WorkUnitPhase::Plan
        }
    }
}

/// Whether PLAN.md has actual content beyond the template.
///
/// Looks for text in the `## Approach` section that is not an HTML comment.
pub fn plan_has_content(plan_path: &Path) -> bool {
    let Ok(content) = std::fs::read_to_string(plan_path) else {
        return false;
    };
    let Some(approach) = section_text(&content, "## Approach") else {
        return false;
    };
    !strip_html_comments(&approach).trim().is_empty()
}

/// Extract the text of a `## `-level markdown section, up to the next one.
fn section_text(content: &str, heading: &str) -> Option<String> {
    let mut collecting = false;
    let mut lines = Vec::new();
    for line in content.lines() {
        if collecting {
            if line.starts_with("## ") {
                break;
            }
            lines.push(line);
        } else if line.trim_end() == heading {
            collecting = true;
        }
    }
    if collecting {
        Some(lines.join("\n"))
    } else {
        None
    }
}

fn strip_html_comments(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?s)<!--.*?-->").unwrap_or_else(|_| unreachable!())
    });
    re.replace_all(text, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_chunk(root: &Path, name: &str, status: &str, plan: Option<&str>) {
        let dir = root.join("docs").join("chunks").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("GOAL.md"),
            format!(
                "---\nstatus: {status}\ncreated_after: []\n---\n# Goal\n\n## Minor Goal\n\nShip the {name} feature.\n"
            ),
        )
        .unwrap();
        if let Some(plan) = plan {
            fs::write(dir.join("PLAN.md"), plan).unwrap();
        }
    }

    const TEMPLATE_PLAN: &str =
        "# Plan\n\n## Approach\n\n<!-- Describe the approach here. -->\n\n## Risks\n";
    const REAL_PLAN: &str =
        "# Plan\n\n## Approach\n\nRefactor the parser, then add the new pass.\n\n## Risks\n";

    #[test]
    fn plan_content_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let template = tmp.path().join("PLAN.md");
        fs::write(&template, TEMPLATE_PLAN).unwrap();
        assert!(!plan_has_content(&template));

        let real = tmp.path().join("PLAN2.md");
        fs::write(&real, REAL_PLAN).unwrap();
        assert!(plan_has_content(&real));

        assert!(!plan_has_content(&tmp.path().join("missing.md")));
    }

    #[test]
    fn injectable_future_with_empty_plan_warns() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "feature", "FUTURE", Some(TEMPLATE_PLAN));
        let chunks = Chunks::new(tmp.path());

        let outcome = chunks.validate_injectable("feature");
        assert!(outcome.success());
        assert_eq!(outcome.warnings.len(), 1);
    }

    #[test]
    fn injectable_implementing_requires_plan() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "feature", "IMPLEMENTING", Some(TEMPLATE_PLAN));
        let chunks = Chunks::new(tmp.path());

        let outcome = chunks.validate_injectable("feature");
        assert!(!outcome.success());

        write_chunk(tmp.path(), "ready", "IMPLEMENTING", Some(REAL_PLAN));
        assert!(chunks.validate_injectable("ready").success());
    }

    #[test]
    fn injectable_rejects_terminal_statuses() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "old", "HISTORICAL", Some(REAL_PLAN));
        let chunks = Chunks::new(tmp.path());
        assert!(!chunks.validate_injectable("old").success());
    }

    #[test]
    fn injectable_missing_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let chunks = Chunks::new(tmp.path());
        let outcome = chunks.validate_injectable("ghost");
        assert!(!outcome.success());
        assert!(outcome.errors[0].contains("not found"));
    }

    #[test]
    fn initial_phase_detection() {
        let tmp = tempfile::tempdir().unwrap();
        let chunks = Chunks::new(tmp.path());

        // No GOAL.md at all.
        fs::create_dir_all(chunks.chunk_dir("bare")).unwrap();
        assert_eq!(chunks.detect_initial_phase("bare"), WorkUnitPhase::Goal);

        write_chunk(tmp.path(), "unplanned", "FUTURE", Some(TEMPLATE_PLAN));
        assert_eq!(chunks.detect_initial_phase("unplanned"), WorkUnitPhase::Plan);

        write_chunk(tmp.path(), "planned", "IMPLEMENTING", Some(REAL_PLAN));
        assert_eq!(chunks.detect_initial_phase("planned"), WorkUnitPhase::Implement);
    }

    #[test]
    fn set_status_preserves_body_and_created_after() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "feature", "IMPLEMENTING", None);
        let chunks = Chunks::new(tmp.path());

        chunks.set_status("feature", ChunkStatus::Active).unwrap();
        let doc = chunks.goal_document("feature").unwrap().unwrap();
        assert_eq!(doc.frontmatter.status, ChunkStatus::Active);
        assert!(doc.body.contains("## Minor Goal"));
    }

    #[test]
    fn current_implementing_scans_chunks() {
        let tmp = tempfile::tempdir().unwrap();
        write_chunk(tmp.path(), "done", "ACTIVE", None);
        write_chunk(tmp.path(), "wip", "IMPLEMENTING", None);
        let chunks = Chunks::new(tmp.path());
        assert_eq!(chunks.current_implementing().as_deref(), Some("wip"));
    }

    #[test]
    fn goal_summary_truncates() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("docs").join("chunks").join("long");
        fs::create_dir_all(&dir).unwrap();
        let long_text = "x".repeat(300);
        fs::write(
            dir.join("GOAL.md"),
            format!("---\nstatus: FUTURE\n---\n## Minor Goal\n\n{long_text}\n"),
        )
        .unwrap();

        let chunks = Chunks::new(tmp.path());
        let summary = chunks.goal_summary("long").unwrap();
        assert_eq!(summary.chars().count(), 200);
        assert!(summary.ends_with("..."));
    }
}
