//! Causal artifact index.
//!
//! Orders workflow artifacts (chunks, narratives, investigations, subsystems)
//! by their `created_after` frontmatter edges, selects *tips* (artifacts that
//! are status-eligible and referenced by no other artifact), and answers
//! ancestor queries. The index is persisted as a single JSON document at
//! `<repo>/.artifact-order.json` and rebuilt lazily when the directory
//! listing of an artifact type changes.
//!
//! Staleness is directory-membership only: `created_after` is immutable once
//! written, so content edits inside an artifact never invalidate the cache.
//! Any future workflow that mutates `created_after` must force a
//! [`ArtifactIndex::rebuild`].

mod topo;

pub use topo::topological_sort_multi_parent;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use chunkflow_core::frontmatter::parse_document;
use chunkflow_core::{
    ChunkStatus, ChunkflowResult, ExternalArtifactRef, NarrativeStatus, OverviewFrontmatter,
};

/// On-disk document version.
pub const INDEX_VERSION: u32 = 3;

/// The artifact kinds covered by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    /// `docs/chunks/*` with GOAL.md.
    Chunk,
    /// `docs/narratives/*` with OVERVIEW.md.
    Narrative,
    /// `docs/investigations/*` with OVERVIEW.md.
    Investigation,
    /// `docs/subsystems/*` with OVERVIEW.md.
    Subsystem,
}

impl ArtifactType {
    /// All artifact types.
    pub const ALL: [ArtifactType; 4] = [
        ArtifactType::Chunk,
        ArtifactType::Narrative,
        ArtifactType::Investigation,
        ArtifactType::Subsystem,
    ];

    /// Directory name under `docs/`.
    pub fn dir_name(self) -> &'static str {
        match self {
            ArtifactType::Chunk => "chunks",
            ArtifactType::Narrative => "narratives",
            ArtifactType::Investigation => "investigations",
            ArtifactType::Subsystem => "subsystems",
        }
    }

    /// Key in the persisted JSON document.
    pub fn key(self) -> &'static str {
        match self {
            ArtifactType::Chunk => "chunk",
            ArtifactType::Narrative => "narrative",
            ArtifactType::Investigation => "investigation",
            ArtifactType::Subsystem => "subsystem",
        }
    }

    /// The main markdown file an artifact directory must carry.
    pub fn main_file(self) -> &'static str {
        match self {
            ArtifactType::Chunk => "GOAL.md",
            _ => "OVERVIEW.md",
        }
    }
}

/// Per-type slice of the persisted index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeIndex {
    /// Deterministic topological order of the `created_after` DAG.
    pub ordered: Vec<String>,
    /// Status-eligible artifacts referenced by no other artifact.
    pub tips: Vec<String>,
    /// Sorted directory snapshot used for staleness detection.
    pub directories: Vec<String>,
    /// Document version.
    pub version: u32,
}

/// What a single artifact contributed to the graph during a scan.
#[derive(Debug)]
struct ScannedArtifact {
    created_after: Vec<String>,
    tip_eligible: bool,
}

/// Lazily rebuilt causal index over one repository.
#[derive(Debug, Clone)]
pub struct ArtifactIndex {
    project_dir: PathBuf,
}

impl ArtifactIndex {
    /// Create an index for the repository at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
        }
    }

    /// Path of the persisted document.
    pub fn index_path(&self) -> PathBuf {
        self.project_dir.join(".artifact-order.json")
    }

    /// Topological order of the given artifact type.
    pub fn get_ordered(&self, ty: ArtifactType) -> ChunkflowResult<Vec<String>> {
        Ok(self.load_or_rebuild(ty)?.ordered)
    }

    /// Current tips of the given artifact type.
    pub fn find_tips(&self, ty: ArtifactType) -> ChunkflowResult<Vec<String>> {
        Ok(self.load_or_rebuild(ty)?.tips)
    }

    /// Transitive `created_after` ancestors of `name`.
    ///
    /// Always computed from the live directory scan: ancestry feeds conflict
    /// analysis and must not lag behind a freshly written chunk.
    pub fn get_ancestors(&self, ty: ArtifactType, name: &str) -> ChunkflowResult<BTreeSet<String>> {
        let scanned = self.scan(ty);
        let mut ancestors = BTreeSet::new();
        let mut stack: Vec<String> = scanned
            .get(name)
            .map(|a| a.created_after.clone())
            .unwrap_or_default();
        while let Some(parent) = stack.pop() {
            if !scanned.contains_key(&parent) {
                continue; // deleted ancestor, skip silently
            }
            if ancestors.insert(parent.clone()) {
                if let Some(entry) = scanned.get(&parent) {
                    stack.extend(entry.created_after.iter().cloned());
                }
            }
        }
        Ok(ancestors)
    }

    /// Force recomputation and persistence for one artifact type.
    pub fn rebuild(&self, ty: ArtifactType) -> ChunkflowResult<TypeIndex> {
        let entry = self.build(ty);
        self.persist(ty, &entry)?;
        Ok(entry)
    }

    fn load_or_rebuild(&self, ty: ArtifactType) -> ChunkflowResult<TypeIndex> {
        let current_dirs = self.enumerate(ty);

        if let Some(entry) = self.load_entry(ty) {
            if entry.version == INDEX_VERSION && entry.directories == current_dirs {
                return Ok(entry);
            }
            debug!(ty = ty.key(), "artifact index stale, rebuilding");
        }

        self.rebuild(ty)
    }

    fn load_entry(&self, ty: ArtifactType) -> Option<TypeIndex> {
        let raw = std::fs::read_to_string(self.index_path()).ok()?;
        let doc: BTreeMap<String, TypeIndex> = serde_json::from_str(&raw).ok()?;
        doc.get(ty.key()).cloned()
    }

    fn persist(&self, ty: ArtifactType, entry: &TypeIndex) -> ChunkflowResult<()> {
        let mut doc: BTreeMap<String, TypeIndex> = std::fs::read_to_string(self.index_path())
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        doc.insert(ty.key().to_string(), entry.clone());

        // Atomic write: concurrent readers must never observe torn JSON.
        let json = serde_json::to_string_pretty(&doc)?;
        let tmp = self.index_path().with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.index_path())?;
        Ok(())
    }

    fn build(&self, ty: ArtifactType) -> TypeIndex {
        let scanned = self.scan(ty);
        let directories: Vec<String> = scanned.keys().cloned().collect();

        let deps: BTreeMap<String, Vec<String>> = scanned
            .iter()
            .map(|(name, a)| (name.clone(), a.created_after.clone()))
            .collect();

        // Legacy repositories carry no causal edges at all; fall back to the
        // lexicographic directory listing.
        let ordered = if deps.values().all(Vec::is_empty) {
            directories.clone()
        } else {
            topological_sort_multi_parent(&deps)
        };

        let referenced: BTreeSet<&String> = scanned
            .values()
            .flat_map(|a| a.created_after.iter())
            .collect();

        let tips: Vec<String> = ordered
            .iter()
            .filter(|name| {
                scanned
                    .get(*name)
                    .is_some_and(|a| a.tip_eligible && !referenced.contains(*name))
            })
            .cloned()
            .collect();

        TypeIndex {
            ordered,
            tips,
            directories,
            version: INDEX_VERSION,
        }
    }

    /// Sorted artifact directory names for one type.
    fn enumerate(&self, ty: ArtifactType) -> Vec<String> {
        let dir = self.project_dir.join("docs").join(ty.dir_name());
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| {
                let path = e.path();
                path.is_dir()
                    && (path.join(ty.main_file()).is_file()
                        || path.join("external.yaml").is_file())
            })
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    fn scan(&self, ty: ArtifactType) -> BTreeMap<String, ScannedArtifact> {
        let docs_dir = self.project_dir.join("docs").join(ty.dir_name());
        let mut out = BTreeMap::new();

        for name in self.enumerate(ty) {
            let artifact_dir = docs_dir.join(&name);
            let external_path = artifact_dir.join("external.yaml");

            let scanned = if external_path.is_file() {
                scan_external(&external_path)
            } else {
                scan_local(&artifact_dir.join(ty.main_file()), ty)
            };

            match scanned {
                Some(artifact) => {
                    out.insert(name, artifact);
                }
                None => {
                    // Malformed artifact: absent from the graph, query goes on.
                    warn!(ty = ty.key(), artifact = %name, "skipping unparsable artifact");
                }
            }
        }
        out
    }
}

fn scan_local(main_file: &Path, ty: ArtifactType) -> Option<ScannedArtifact> {
    let raw = std::fs::read_to_string(main_file).ok()?;

    // A main file without frontmatter still participates, just without edges
    // and without tip eligibility for status-gated types.
    let frontmatter = parse_document::<OverviewFrontmatter>(&raw)
        .map(|d| d.frontmatter)
        .ok();

    let created_after = frontmatter
        .as_ref()
        .map(|f| f.created_after.clone())
        .unwrap_or_default();

    let status = frontmatter.and_then(|f| f.status);

    let tip_eligible = match ty {
        ArtifactType::Chunk => status
            .as_deref()
            .and_then(|s| ChunkStatus::from_str(s).ok())
            .is_some_and(ChunkStatus::is_tip_eligible),
        ArtifactType::Narrative => status
            .as_deref()
            .and_then(|s| NarrativeStatus::from_str(s).ok())
            .is_some_and(NarrativeStatus::is_tip_eligible),
        // Investigations and subsystems are tip-eligible at every status.
        ArtifactType::Investigation | ArtifactType::Subsystem => true,
    };

    Some(ScannedArtifact {
        created_after,
        tip_eligible,
    })
}

fn scan_external(external_path: &Path) -> Option<ScannedArtifact> {
    let raw = std::fs::read_to_string(external_path).ok()?;
    let external: ExternalArtifactRef = serde_yaml_ng::from_str(&raw).ok()?;
    Some(ScannedArtifact {
        created_after: external.created_after,
        // External references are always tip-eligible.
        tip_eligible: true,
    })
}
