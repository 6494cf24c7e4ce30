use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, warn};

use chunkflow_core::refs::{any_overlap, overlapping_pairs, SymbolicRef, LOCAL_PROJECT};
use chunkflow_core::{Chunks, ChunkflowResult, ConflictVerdict};
use chunkflow_index::{ArtifactIndex, ArtifactType};
use chunkflow_state::{ConflictAnalysis, StateStore};

/// Classifies chunk pairs for safe parallelisation.
///
/// Pure with respect to work units: the decision depends only on the two
/// chunks' frontmatter and the causal index; cached verdicts live in the
/// state store per canonical pair.
pub struct ConflictOracle {
    chunks: Chunks,
    index: ArtifactIndex,
    store: Arc<StateStore>,
}

impl ConflictOracle {
    /// Create an oracle for the repository at `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>, store: Arc<StateStore>) -> Self {
        let project_dir = project_dir.into();
        Self {
            chunks: Chunks::new(&project_dir),
            index: ArtifactIndex::new(&project_dir),
            store,
        }
    }

    /// Analyse a pair, serving the cached verdict when one exists.
    pub fn analyze_conflict(&self, a: &str, b: &str) -> ChunkflowResult<ConflictAnalysis> {
        if let Some(cached) = self.store.get_conflict(a, b)? {
            debug!(chunk_a = %cached.chunk_a, chunk_b = %cached.chunk_b, "conflict cache hit");
            return Ok(cached);
        }
        let analysis = self.compute(a, b)?;
        self.store.upsert_conflict(&analysis)?;
        Ok(analysis)
    }

    /// Parsed `code_references` of a chunk. Unparsable entries are skipped.
    fn refs_of(&self, chunk: &str) -> ChunkflowResult<Vec<SymbolicRef>> {
        let Some(frontmatter) = self.chunks.frontmatter(chunk).unwrap_or(None) else {
            return Ok(Vec::new());
        };
        let mut refs = Vec::new();
        for code_ref in &frontmatter.code_references {
            match SymbolicRef::parse(&code_ref.reference) {
                Ok(parsed) => refs.push(parsed),
                Err(e) => {
                    warn!(chunk, reference = %code_ref.reference, error = %e, "skipping unparsable code reference");
                }
            }
        }
        Ok(refs)
    }

    fn compute(&self, a: &str, b: &str) -> ChunkflowResult<ConflictAnalysis> {
        let refs_a = self.refs_of(a)?;
        let refs_b = self.refs_of(b)?;

        // 1. Shared-file test.
        let files_a: BTreeSet<(String, String)> =
            refs_a.iter().map(|r| r.file_key(LOCAL_PROJECT)).collect();
        let files_b: BTreeSet<(String, String)> =
            refs_b.iter().map(|r| r.file_key(LOCAL_PROJECT)).collect();
        if files_a.is_disjoint(&files_b) {
            return Ok(ConflictAnalysis::new(
                a,
                b,
                ConflictVerdict::Independent,
                "no file overlap",
            ));
        }

        // 2. Symbol-hierarchy test.
        if !any_overlap(&refs_a, &refs_b, LOCAL_PROJECT) {
            return Ok(ConflictAnalysis::new(
                a,
                b,
                ConflictVerdict::Independent,
                "no symbol overlap",
            ));
        }

        // 3. Ancestry test: causally ordered chunks are serialised by
        //    construction.
        let ancestors_a = self.index.get_ancestors(ArtifactType::Chunk, a)?;
        let ancestors_b = self.index.get_ancestors(ArtifactType::Chunk, b)?;
        if ancestors_a.contains(b) || ancestors_b.contains(a) {
            return Ok(ConflictAnalysis::new(
                a,
                b,
                ConflictVerdict::Serialize,
                "causal ancestor",
            ));
        }

        // 4. Overlapping, causally unrelated: the operator decides.
        let pairs = overlapping_pairs(&refs_a, &refs_b, LOCAL_PROJECT);
        let rendered: Vec<String> = pairs
            .iter()
            .map(|(ra, rb)| format!("{ra} <-> {rb}"))
            .collect();
        Ok(ConflictAnalysis::new(
            a,
            b,
            ConflictVerdict::AskOperator,
            format!("overlapping references: {}", rendered.join(", ")),
        ))
    }
}
