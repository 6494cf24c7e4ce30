//! Durable orchestrator state.
//!
//! A single-writer SQLite store holding work units, their status-transition
//! history, cached conflict analyses, and daemon configuration. Every status
//! change appends exactly one history row and fans out a [`StateEvent`] on an
//! in-process broadcast channel, which the WebSocket broker consumes.
//!
//! # Main types
//!
//! - [`StateStore`]: The store handle (cheaply clonable via `Arc`).
//! - [`WorkUnit`]: The orchestrator's runtime handle on a chunk.
//! - [`ConflictAnalysis`]: A cached oracle verdict for a canonical pair.
//! - [`OrchestratorConfig`]: Daemon configuration backed by the config table.
//! - [`StateEvent`]: In-process notification of a state change.

/// In-process state-change notifications.
pub mod events;
/// Work unit, conflict, history, and config models.
pub mod model;
/// The SQLite-backed store.
pub mod store;

pub use events::{AttentionAction, StateEvent};
pub use model::{
    canonical_pair, AttentionItem, ConflictAnalysis, OrchestratorConfig, StatusTransition,
    WorkUnit,
};
pub use store::StateStore;
