use std::path::PathBuf;
use std::sync::Arc;

use axum::routing::{get, patch, post};
use axum::Router;
use chrono::{DateTime, Utc};

use chunkflow_core::Chunks;
use chunkflow_state::{AttentionItem, StateStore};

use crate::handlers;
use crate::ws;

/// Shared application state threaded through every handler.
pub struct AppState {
    /// The state store.
    pub store: Arc<StateStore>,
    /// Host repository root.
    pub project_dir: PathBuf,
    /// When the daemon started, for uptime reporting.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Create application state rooted at `project_dir`.
    pub fn new(store: Arc<StateStore>, project_dir: impl Into<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            store,
            project_dir: project_dir.into(),
            started_at: Utc::now(),
        })
    }

    /// Chunk accessor for the host repository.
    pub fn chunks(&self) -> Chunks {
        Chunks::new(&self.project_dir)
    }

    /// The enriched attention queue (blocks count, wait time, goal summary).
    pub fn attention_items(&self) -> Vec<AttentionItem> {
        let Ok(queue) = self.store.get_attention_queue() else {
            return Vec::new();
        };
        let chunks = self.chunks();
        let now = Utc::now();
        queue
            .into_iter()
            .map(|(unit, blocks_count)| {
                let time_waiting =
                    (now - unit.updated_at).num_milliseconds().max(0) as f64 / 1000.0;
                let goal_summary = chunks.goal_summary(&unit.chunk);
                AttentionItem {
                    unit,
                    blocks_count,
                    time_waiting,
                    goal_summary,
                }
            })
            .collect()
    }
}

/// Build the control-plane router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(handlers::dashboard))
        .route("/ws", get(ws::ws_handler))
        .route("/status", get(handlers::status))
        .route("/config", get(handlers::get_config).patch(handlers::patch_config))
        .route("/attention", get(handlers::attention))
        .route("/conflicts", get(handlers::list_conflicts))
        .route("/conflicts/analyze", post(handlers::analyze_conflict))
        .route("/conflicts/{chunk}", get(handlers::conflicts_for_chunk))
        .route(
            "/work-units",
            get(handlers::list_work_units).post(handlers::create_work_unit),
        )
        .route("/work-units/inject", post(handlers::inject))
        .route("/work-units/queue", get(handlers::queue))
        .route("/work-units/{chunk}/answer", post(handlers::answer))
        .route("/work-units/{chunk}/history", get(handlers::history))
        .route("/work-units/{chunk}/priority", patch(handlers::set_priority))
        .route("/work-units/{chunk}/resolve", post(handlers::resolve))
        .route("/work-units/{chunk}/retry-merge", post(handlers::retry_merge))
        .route(
            "/work-units/{chunk}",
            get(handlers::get_work_unit)
                .patch(handlers::update_work_unit)
                .delete(handlers::delete_work_unit),
        )
        .with_state(state)
}
