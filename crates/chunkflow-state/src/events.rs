use serde::Serialize;

/// Attention-queue delta kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AttentionAction {
    /// A unit entered NEEDS_ATTENTION.
    Added,
    /// A unit left NEEDS_ATTENTION.
    Resolved,
}

/// In-process notification of a state-store write.
///
/// Broadcast best-effort: slow or absent subscribers never block the store.
/// The WebSocket broker maps these onto the wire protocol.
#[derive(Debug, Clone, Serialize)]
pub enum StateEvent {
    /// A work unit was created, updated, or deleted.
    ///
    /// `status` is a string so deletions can carry the literal `"DELETED"`.
    WorkUnitUpdate {
        /// The chunk name.
        chunk: String,
        /// New status, or `"DELETED"`.
        status: String,
        /// Current phase; empty on deletion.
        phase: String,
        /// Attention reason, when set.
        attention_reason: Option<String>,
    },
    /// The attention queue gained or lost a unit.
    AttentionUpdate {
        /// What happened.
        action: AttentionAction,
        /// The chunk name.
        chunk: String,
        /// The attention reason for `added` events.
        reason: Option<String>,
    },
}
