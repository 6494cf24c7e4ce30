//! Core types and error definitions for the Chunkflow orchestrator.
//!
//! This crate provides the foundational types shared across all Chunkflow
//! crates: error handling, chunk artifact models (YAML frontmatter), status
//! machines, symbolic code references, and the chunk directory accessor.
//!
//! # Main types
//!
//! - [`ChunkflowError`]: Unified error enum for all Chunkflow subsystems.
//! - [`ChunkflowResult`]: Convenience alias for `Result<T, ChunkflowError>`.
//! - [`ChunkStatus`] / [`WorkUnitPhase`] / [`WorkUnitStatus`]: Lifecycle enums.
//! - [`ChunkFrontmatter`]: Typed view of a chunk's GOAL.md frontmatter.
//! - [`SymbolicRef`]: Parsed `[org/repo::]file[#symbol[::symbol…]]` reference.
//! - [`Chunks`]: Accessor for `docs/chunks/<name>` artifact directories.

/// Chunk directory accessor and injection validation.
pub mod chunks;
/// Error types.
pub mod error;
/// Frontmatter documents (split, parse, serialize).
pub mod frontmatter;
/// Identifier validation rules.
pub mod ids;
/// Symbolic code references and overlap detection.
pub mod refs;
/// Lifecycle status enums and transition rules.
pub mod status;

pub use chunks::{Chunks, ValidationOutcome};
pub use error::{ChunkflowError, ChunkflowResult};
pub use frontmatter::{
    ArtifactRef, ChunkFrontmatter, CodeReference, Document, ExternalArtifactRef,
    OverviewFrontmatter,
};
pub use refs::SymbolicRef;
pub use status::{
    BugType, ChunkStatus, ConflictVerdict, NarrativeStatus, WorkUnitPhase, WorkUnitStatus,
};
