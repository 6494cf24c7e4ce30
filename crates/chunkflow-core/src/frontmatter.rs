use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{ChunkflowError, ChunkflowResult};
use crate::ids;
use crate::status::{BugType, ChunkStatus};

/// A markdown document split into typed frontmatter and body text.
#[derive(Debug, Clone)]
pub struct Document<T> {
    /// The parsed YAML frontmatter.
    pub frontmatter: T,
    /// Everything after the closing `---`, without a leading blank line.
    pub body: String,
}

/// Split raw markdown into the YAML frontmatter string and the body.
///
/// Returns an error when the document does not start with a `---` block.
pub fn split_frontmatter(raw: &str) -> ChunkflowResult<(&str, &str)> {
    let trimmed = raw.trim_start();
    if !trimmed.starts_with("---") {
        return Err(ChunkflowError::Chunk(
            "document has no YAML frontmatter (missing opening ---)".to_string(),
        ));
    }

    let after_open = &trimmed[3..];
    let close_pos = after_open.find("\n---").ok_or_else(|| {
        ChunkflowError::Chunk(
            "document has unterminated YAML frontmatter (missing closing ---)".to_string(),
        )
    })?;

    let yaml = &after_open[..close_pos];
    let rest = &after_open[close_pos + 4..];
    // Drop the newline that terminates the closing delimiter, if present.
    let body = rest.strip_prefix('\n').unwrap_or(rest);
    Ok((yaml, body))
}

/// Parse a markdown document into typed frontmatter and body.
pub fn parse_document<T: DeserializeOwned>(raw: &str) -> ChunkflowResult<Document<T>> {
    let (yaml, body) = split_frontmatter(raw)?;
    let frontmatter: T = serde_yaml_ng::from_str(yaml)
        .map_err(|e| ChunkflowError::Chunk(format!("invalid YAML frontmatter: {e}")))?;
    Ok(Document {
        frontmatter,
        body: body.to_string(),
    })
}

/// Serialize a document back to markdown.
///
/// Frontmatter is re-serialized from the typed model so key order is
/// deterministic (struct field order); the body is emitted verbatim.
pub fn render_document<T: Serialize>(doc: &Document<T>) -> ChunkflowResult<String> {
    let yaml = serde_yaml_ng::to_string(&doc.frontmatter)
        .map_err(|e| ChunkflowError::Chunk(format!("failed to serialize frontmatter: {e}")))?;
    Ok(format!("---\n{yaml}---\n{}", doc.body))
}

/// Accepts a YAML list, a legacy single string, or null for `created_after`.
fn de_created_after<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    Ok(match raw {
        None => Vec::new(),
        Some(Raw::One(s)) => vec![s],
        Some(Raw::Many(v)) => v,
    })
}

/// One `code_references` entry in a chunk's GOAL.md.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeReference {
    /// `[org/repo::]file[#symbol[::symbol…]]`
    #[serde(rename = "ref")]
    pub reference: String,
    /// What this reference implements, in prose.
    pub implements: String,
    /// Optional compliance level annotation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<String>,
}

/// A reference to another workflow artifact (used for `dependents`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Artifact kind: `chunk`, `narrative`, `investigation`, `subsystem`.
    pub artifact_type: String,
    /// The artifact directory name.
    pub artifact_id: String,
    /// Present when the artifact lives in another repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
}

/// Typed frontmatter of a chunk's GOAL.md.
///
/// `created_after` is immutable once written; the causal index depends on
/// that contract for its directory-membership staleness check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkFrontmatter {
    /// Lifecycle status.
    pub status: ChunkStatus,
    /// Causal parents (chunk names). Accepts a legacy single string.
    #[serde(default, deserialize_with = "de_created_after")]
    pub created_after: Vec<String>,
    /// Code locations this chunk touches.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub code_references: Vec<CodeReference>,
    /// Optional external ticket id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    /// Bug classification, for bug-fix chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bug_type: Option<BugType>,
    /// Subsystems this chunk belongs to.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsystems: Vec<String>,
    /// Owning narrative, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    /// Originating investigation, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub investigation: Option<String>,
    /// Friction log entries addressed by this chunk (`F<n>` ids).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub friction_entries: Vec<String>,
    /// Artifacts created after (and because of) this chunk.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependents: Vec<ArtifactRef>,
}

impl ChunkFrontmatter {
    /// Validation problems in this frontmatter, empty when clean.
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        for parent in &self.created_after {
            if !ids::is_valid_artifact_name(parent) {
                errors.push(format!("invalid created_after entry: {parent}"));
            }
        }
        for entry in &self.friction_entries {
            if !ids::is_valid_friction_id(entry) {
                errors.push(format!("invalid friction entry id: {entry}"));
            }
        }
        errors
    }
}

/// Frontmatter shared by narratives, investigations, and subsystems
/// (OVERVIEW.md). Status stays a free string: tip eligibility differs per
/// type and unknown statuses must not fail parsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewFrontmatter {
    /// Lifecycle status string (e.g. `ACTIVE`, `DRAFTING`).
    #[serde(default)]
    pub status: Option<String>,
    /// Causal parents.
    #[serde(default, deserialize_with = "de_created_after")]
    pub created_after: Vec<String>,
}

/// An `external.yaml` standing in for an artifact in another repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalArtifactRef {
    /// Artifact kind in the remote repository.
    pub artifact_type: String,
    /// Artifact directory name in the remote repository.
    pub artifact_id: String,
    /// `org/repo` the artifact lives in.
    pub repo: String,
    /// Branch to track, if not pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    /// Pinned 40-hex commit, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<String>,
    /// Causal parents in the local repository.
    #[serde(default, deserialize_with = "de_created_after")]
    pub created_after: Vec<String>,
}

impl ExternalArtifactRef {
    /// Validation problems in this reference, empty when clean.
    pub fn problems(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if !ids::is_valid_repo_ref(&self.repo) {
            errors.push(format!("invalid repo reference: {}", self.repo));
        }
        if !ids::is_valid_artifact_name(&self.artifact_id) {
            errors.push(format!("invalid artifact id: {}", self.artifact_id));
        }
        if let Some(pinned) = &self.pinned {
            if !ids::is_valid_pinned_sha(pinned) {
                errors.push(format!("invalid pinned sha: {pinned}"));
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOAL: &str = "---\nstatus: IMPLEMENTING\ncreated_after:\n  - first_chunk\ncode_references:\n  - ref: \"src/foo.py#Bar\"\n    implements: \"the Bar type\"\n---\n# Goal\n\nBody text.\n";

    #[test]
    fn parse_chunk_goal() {
        let doc: Document<ChunkFrontmatter> = parse_document(GOAL).unwrap();
        assert_eq!(doc.frontmatter.status, ChunkStatus::Implementing);
        assert_eq!(doc.frontmatter.created_after, vec!["first_chunk"]);
        assert_eq!(doc.frontmatter.code_references.len(), 1);
        assert_eq!(doc.frontmatter.code_references[0].reference, "src/foo.py#Bar");
        assert!(doc.body.starts_with("# Goal"));
    }

    #[test]
    fn created_after_legacy_string() {
        let raw = "---\nstatus: FUTURE\ncreated_after: \"older\"\n---\nbody\n";
        let doc: Document<ChunkFrontmatter> = parse_document(raw).unwrap();
        assert_eq!(doc.frontmatter.created_after, vec!["older"]);
    }

    #[test]
    fn created_after_null_and_missing() {
        for raw in [
            "---\nstatus: FUTURE\ncreated_after: null\n---\nbody\n",
            "---\nstatus: FUTURE\n---\nbody\n",
        ] {
            let doc: Document<ChunkFrontmatter> = parse_document(raw).unwrap();
            assert!(doc.frontmatter.created_after.is_empty());
        }
    }

    #[test]
    fn missing_frontmatter_is_an_error() {
        assert!(parse_document::<ChunkFrontmatter>("# Just a heading\n").is_err());
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let raw = "---\nstatus: [unclosed\n---\nbody\n";
        assert!(parse_document::<ChunkFrontmatter>(raw).is_err());
    }

    #[test]
    fn render_round_trips_status_mutation() {
        let mut doc: Document<ChunkFrontmatter> = parse_document(GOAL).unwrap();
        doc.frontmatter.status = ChunkStatus::Active;
        let rendered = render_document(&doc).unwrap();

        let reparsed: Document<ChunkFrontmatter> = parse_document(&rendered).unwrap();
        assert_eq!(reparsed.frontmatter.status, ChunkStatus::Active);
        assert_eq!(reparsed.frontmatter.created_after, vec!["first_chunk"]);
        assert_eq!(reparsed.body, doc.body);
    }

    #[test]
    fn render_is_deterministic() {
        let doc: Document<ChunkFrontmatter> = parse_document(GOAL).unwrap();
        assert_eq!(render_document(&doc).unwrap(), render_document(&doc).unwrap());
    }

    #[test]
    fn external_ref_validation() {
        let ok = ExternalArtifactRef {
            artifact_type: "chunk".to_string(),
            artifact_id: "remote_feature".to_string(),
            repo: "acme/widget".to_string(),
            track: None,
            pinned: Some("a".repeat(40)),
            created_after: vec![],
        };
        assert!(ok.problems().is_empty());

        let bad = ExternalArtifactRef {
            pinned: Some("xyz".to_string()),
            repo: "not-a-repo".to_string(),
            ..ok
        };
        let problems = bad.problems();
        assert_eq!(problems.len(), 2);
    }

    #[test]
    fn frontmatter_problems() {
        let raw =
            "---\nstatus: FUTURE\ncreated_after:\n  - \"Bad Name\"\nfriction_entries:\n  - nope\n---\nbody\n";
        let doc: Document<ChunkFrontmatter> = parse_document(raw).unwrap();
        assert_eq!(doc.frontmatter.problems().len(), 2);
    }
}
