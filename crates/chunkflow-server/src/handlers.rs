use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::Json;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use chunkflow_core::{
    ChunkflowError, ConflictVerdict, WorkUnitPhase, WorkUnitStatus,
};
use chunkflow_orchestrator::ConflictOracle;
use chunkflow_state::WorkUnit;
use chunkflow_worktree::WorktreeManager;

use crate::dashboard;
use crate::server::AppState;

/// JSON error envelope with an HTTP status.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(resource: &str, id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: format!("{resource} '{id}' not found"),
        }
    }
}

impl From<ChunkflowError> for ApiError {
    fn from(err: ChunkflowError) -> Self {
        let status = match &err {
            ChunkflowError::Validation(_) => StatusCode::BAD_REQUEST,
            ChunkflowError::NotFound(_) => StatusCode::NOT_FOUND,
            ChunkflowError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn is_form(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("application/x-www-form-urlencoded"))
        .unwrap_or(false)
}

/// Parse a JSON or form-encoded body into `T`, depending on content type.
fn parse_body<T: serde::de::DeserializeOwned>(headers: &HeaderMap, body: &Bytes) -> ApiResult<T> {
    if is_form(headers) {
        serde_urlencoded::from_bytes(body)
            .map_err(|e| ApiError::bad_request(format!("Invalid form body: {e}")))
    } else {
        serde_json::from_slice(body).map_err(|e| ApiError::bad_request(format!("Invalid JSON body: {e}")))
    }
}

fn get_unit(state: &AppState, chunk: &str) -> ApiResult<WorkUnit> {
    state
        .store
        .get_work_unit(chunk)?
        .ok_or_else(|| ApiError::not_found("Work unit", chunk))
}

// --- Dashboard ---

/// GET `/`: the HTML dashboard.
pub async fn dashboard(State(state): State<Arc<AppState>>) -> ApiResult<Html<String>> {
    let units = state.store.list_work_units(None)?;
    let attention = state.attention_items();
    Ok(Html(dashboard::render(&attention, &units)))
}

// --- Daemon status ---

/// GET `/status`: daemon liveness and work-unit counts.
pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let counts = state.store.count_by_status()?;
    let uptime = (Utc::now() - state.started_at).num_milliseconds().max(0) as f64 / 1000.0;
    Ok(Json(json!({
        "running": true,
        "pid": std::process::id(),
        "started_at": state.started_at,
        "uptime_seconds": uptime,
        "work_unit_counts": counts,
    })))
}

// --- Config ---

/// GET `/config`: the effective orchestrator configuration.
pub async fn get_config(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let config = state.store.load_config()?;
    Ok(Json(serde_json::to_value(config).map_err(ChunkflowError::from)?))
}

#[derive(Deserialize)]
pub struct ConfigPatch {
    max_agents: Option<i64>,
    dispatch_interval_seconds: Option<f64>,
    max_completion_retries: Option<i64>,
    base_branch: Option<String>,
    shutdown_timeout_seconds: Option<i64>,
}

/// PATCH `/config`: update provided configuration keys.
pub async fn patch_config(
    State(state): State<Arc<AppState>>,
    Json(patch): Json<ConfigPatch>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(max_agents) = patch.max_agents {
        if max_agents < 1 {
            return Err(ApiError::bad_request("max_agents must be a positive integer"));
        }
        state.store.set_config("max_agents", &max_agents.to_string())?;
    }
    if let Some(interval) = patch.dispatch_interval_seconds {
        if interval <= 0.0 {
            return Err(ApiError::bad_request(
                "dispatch_interval_seconds must be a positive number",
            ));
        }
        state
            .store
            .set_config("dispatch_interval_seconds", &interval.to_string())?;
    }
    if let Some(retries) = patch.max_completion_retries {
        if retries < 0 {
            return Err(ApiError::bad_request(
                "max_completion_retries must be non-negative",
            ));
        }
        state
            .store
            .set_config("max_completion_retries", &retries.to_string())?;
    }
    if let Some(branch) = patch.base_branch {
        if branch.is_empty() {
            return Err(ApiError::bad_request("base_branch must be non-empty"));
        }
        state.store.set_config("base_branch", &branch)?;
    }
    if let Some(timeout) = patch.shutdown_timeout_seconds {
        if timeout < 0 {
            return Err(ApiError::bad_request(
                "shutdown_timeout_seconds must be non-negative",
            ));
        }
        state
            .store
            .set_config("shutdown_timeout_seconds", &timeout.to_string())?;
    }

    let config = state.store.load_config()?;
    Ok(Json(serde_json::to_value(config).map_err(ChunkflowError::from)?))
}

// --- Attention queue ---

/// GET `/attention`: the prioritised attention queue.
pub async fn attention(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let items = state.attention_items();
    let count = items.len();
    Ok(Json(json!({
        "attention_items": items,
        "count": count,
    })))
}

// --- Work units ---

/// GET `/work-units`: list, optionally filtered by `?status=`.
pub async fn list_work_units(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = params
        .get("status")
        .map(|raw| {
            WorkUnitStatus::from_str(raw)
                .map_err(|_| ApiError::bad_request(format!("Invalid status: {raw}")))
        })
        .transpose()?;
    let units = state.store.list_work_units(status)?;
    let count = units.len();
    Ok(Json(json!({
        "work_units": units,
        "count": count,
    })))
}

#[derive(Deserialize)]
pub struct CreateWorkUnit {
    chunk: String,
    phase: Option<String>,
    status: Option<String>,
    priority: Option<i64>,
    #[serde(default)]
    blocked_by: Vec<String>,
    worktree: Option<String>,
}

/// POST `/work-units`: create a work unit. 409 on duplicate.
pub async fn create_work_unit(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateWorkUnit>,
) -> ApiResult<Response> {
    if body.chunk.is_empty() {
        return Err(ApiError::bad_request("Missing required field: chunk"));
    }
    let phase = body
        .phase
        .as_deref()
        .map(WorkUnitPhase::from_str)
        .transpose()?
        .unwrap_or(WorkUnitPhase::Goal);
    let status = body
        .status
        .as_deref()
        .map(WorkUnitStatus::from_str)
        .transpose()?
        .unwrap_or(WorkUnitStatus::Ready);

    if status == WorkUnitStatus::Blocked && body.blocked_by.is_empty() {
        return Err(ApiError::bad_request(
            "A BLOCKED work unit requires a non-empty blocked_by",
        ));
    }
    if status == WorkUnitStatus::Ready && !body.blocked_by.is_empty() {
        return Err(ApiError::bad_request(
            "A READY work unit cannot have blocked_by entries",
        ));
    }
    if body.blocked_by.iter().any(|c| c == &body.chunk) {
        return Err(ApiError::bad_request("blocked_by cannot contain the chunk itself"));
    }

    let mut unit = WorkUnit::new(&body.chunk, phase);
    unit.status = status;
    unit.priority = body.priority.unwrap_or(0);
    unit.blocked_by = body.blocked_by;
    unit.worktree = body.worktree;

    let created = state.store.create_work_unit(&unit)?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

#[derive(Deserialize)]
pub struct InjectRequest {
    chunk: String,
    phase: Option<String>,
    priority: Option<i64>,
}

/// POST `/work-units/inject`: validate a chunk and create a READY unit.
pub async fn inject(
    State(state): State<Arc<AppState>>,
    Json(body): Json<InjectRequest>,
) -> ApiResult<Response> {
    if body.chunk.is_empty() {
        return Err(ApiError::bad_request("Missing required field: chunk"));
    }

    let chunks = state.chunks();
    let validation = chunks.validate_injectable(&body.chunk);
    if !validation.success() {
        return Err(ApiError::bad_request(validation.errors.join("; ")));
    }

    if let Some(existing) = state.store.get_work_unit(&body.chunk)? {
        return Err(ApiError {
            status: StatusCode::CONFLICT,
            message: format!(
                "Work unit for chunk '{}' already exists (status: {})",
                body.chunk, existing.status
            ),
        });
    }

    let phase = match body.phase.as_deref() {
        Some(raw) => WorkUnitPhase::from_str(raw)?,
        None => chunks.detect_initial_phase(&body.chunk),
    };

    let unit = WorkUnit::new(&body.chunk, phase).with_priority(body.priority.unwrap_or(0));
    let created = state.store.create_work_unit(&unit)?;

    let mut payload = serde_json::to_value(&created).map_err(ChunkflowError::from)?;
    if !validation.warnings.is_empty() {
        payload["warnings"] = json!(validation.warnings);
    }
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

/// GET `/work-units/queue`: the ready queue.
pub async fn queue(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let units = state.store.get_ready_queue(None)?;
    let count = units.len();
    Ok(Json(json!({
        "work_units": units,
        "count": count,
    })))
}

/// GET `/work-units/{chunk}`: fetch one work unit.
pub async fn get_work_unit(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<WorkUnit>> {
    Ok(Json(get_unit(&state, &chunk)?))
}

#[derive(Deserialize)]
pub struct WorkUnitPatch {
    phase: Option<String>,
    status: Option<String>,
    blocked_by: Option<Vec<String>>,
    worktree: Option<String>,
}

/// PATCH `/work-units/{chunk}`: partial update.
pub async fn update_work_unit(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
    Json(patch): Json<WorkUnitPatch>,
) -> ApiResult<Json<WorkUnit>> {
    let mut unit = get_unit(&state, &chunk)?;

    if let Some(raw) = patch.phase.as_deref() {
        unit.phase = WorkUnitPhase::from_str(raw)?;
    }
    if let Some(raw) = patch.status.as_deref() {
        let status = WorkUnitStatus::from_str(raw)?;
        if unit.status == WorkUnitStatus::Done && status != WorkUnitStatus::Done {
            return Err(ApiError::bad_request("DONE is terminal"));
        }
        unit.status = status;
    }
    if let Some(blocked_by) = patch.blocked_by {
        if blocked_by.iter().any(|c| c == &chunk) {
            return Err(ApiError::bad_request(
                "blocked_by cannot contain the chunk itself",
            ));
        }
        unit.blocked_by = blocked_by;
    }
    if let Some(worktree) = patch.worktree {
        unit.worktree = Some(worktree);
    }

    if unit.status == WorkUnitStatus::Blocked && unit.blocked_by.is_empty() {
        return Err(ApiError::bad_request(
            "A BLOCKED work unit requires a non-empty blocked_by",
        ));
    }

    let updated = state.store.update_work_unit(&unit)?;
    Ok(Json(updated))
}

/// DELETE `/work-units/{chunk}`: remove a unit and its worktree/branch.
pub async fn delete_work_unit(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    if !state.store.delete_work_unit(&chunk)? {
        return Err(ApiError::not_found("Work unit", &chunk));
    }

    // Worktree and branch cleanup is best-effort; never fail the delete.
    let config = state.store.load_config()?;
    let manager = WorktreeManager::new(&state.project_dir, &config.base_branch);
    if let Err(e) = manager.remove_worktree(&chunk, true).await {
        warn!(chunk = %chunk, error = %e, "failed to clean up worktree after delete");
    }

    Ok(Json(json!({ "deleted": true, "chunk": chunk })))
}

/// GET `/work-units/{chunk}/history`: the status-transition log.
pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    get_unit(&state, &chunk)?;
    let history = state.store.get_status_history(&chunk)?;
    Ok(Json(json!({
        "chunk": chunk,
        "history": history,
    })))
}

#[derive(Deserialize)]
pub struct PriorityPatch {
    priority: i64,
}

/// PATCH `/work-units/{chunk}/priority`: set the ready-queue priority.
pub async fn set_priority(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
    Json(patch): Json<PriorityPatch>,
) -> ApiResult<Json<WorkUnit>> {
    let mut unit = get_unit(&state, &chunk)?;
    unit.priority = patch.priority;
    Ok(Json(state.store.update_work_unit(&unit)?))
}

#[derive(Deserialize)]
pub struct AnswerBody {
    answer: String,
}

/// POST `/work-units/{chunk}/answer`: submit an operator answer.
///
/// Requires NEEDS_ATTENTION; stores the answer for one-shot injection and
/// transitions the unit back to READY. Accepts JSON or dashboard form bodies.
pub async fn answer(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let mut unit = get_unit(&state, &chunk)?;
    if unit.status != WorkUnitStatus::NeedsAttention {
        return Err(ApiError::bad_request(format!(
            "Work unit '{chunk}' is not in NEEDS_ATTENTION state (current: {})",
            unit.status
        )));
    }

    let parsed: AnswerBody = parse_body(&headers, &body)?;
    if parsed.answer.is_empty() {
        return Err(ApiError::bad_request("Missing required field: answer"));
    }

    unit.pending_answer = Some(parsed.answer);
    unit.attention_reason = None;
    unit.status = WorkUnitStatus::Ready;
    let updated = state.store.update_work_unit(&unit)?;

    if is_form(&headers) {
        return Ok(Redirect::to("/").into_response());
    }
    Ok(Json(updated).into_response())
}

#[derive(Deserialize)]
pub struct ResolveBody {
    other_chunk: String,
    verdict: String,
}

/// POST `/work-units/{chunk}/resolve`: operator verdict on a conflict.
pub async fn resolve(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let mut unit = get_unit(&state, &chunk)?;
    let parsed: ResolveBody = parse_body(&headers, &body)?;

    if parsed.other_chunk.is_empty() {
        return Err(ApiError::bad_request(
            "Missing required fields: other_chunk and verdict",
        ));
    }
    let verdict = match parsed.verdict.as_str() {
        "parallelize" => ConflictVerdict::Independent,
        "serialize" => ConflictVerdict::Serialize,
        _ => {
            return Err(ApiError::bad_request(
                "verdict must be 'parallelize' or 'serialize'",
            ))
        }
    };

    unit.conflict_verdicts
        .insert(parsed.other_chunk.clone(), verdict);
    unit.conflict_override = Some(verdict);

    match verdict {
        ConflictVerdict::Serialize => {
            if !unit.blocked_by.contains(&parsed.other_chunk) {
                unit.blocked_by.push(parsed.other_chunk.clone());
            }
            if unit.status == WorkUnitStatus::NeedsAttention {
                unit.status = WorkUnitStatus::Blocked;
                unit.attention_reason = None;
            }
        }
        ConflictVerdict::Independent => {
            unit.blocked_by.retain(|c| c != &parsed.other_chunk);
            let conflict_reason = unit
                .attention_reason
                .as_deref()
                .map(|r| r.to_lowercase().contains("conflict"))
                .unwrap_or(false);
            if unit.blocked_by.is_empty()
                && unit.status == WorkUnitStatus::NeedsAttention
                && conflict_reason
            {
                unit.status = WorkUnitStatus::Ready;
                unit.attention_reason = None;
            }
        }
        ConflictVerdict::AskOperator => unreachable!(),
    }

    let updated = state.store.update_work_unit(&unit)?;

    if is_form(&headers) {
        return Ok(Redirect::to("/").into_response());
    }
    Ok(Json(json!({
        "chunk": chunk,
        "other_chunk": parsed.other_chunk,
        "verdict": verdict,
        "blocked_by": updated.blocked_by,
    }))
    .into_response())
}

/// POST `/work-units/{chunk}/retry-merge`: retry a failed merge to base.
pub async fn retry_merge(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let mut unit = get_unit(&state, &chunk)?;
    if unit.status != WorkUnitStatus::NeedsAttention {
        return Err(ApiError::bad_request(format!(
            "Work unit '{chunk}' is not in NEEDS_ATTENTION state (current: {})",
            unit.status
        )));
    }
    let merge_failed = unit
        .attention_reason
        .as_deref()
        .map(|r| r.to_lowercase().contains("merge to base failed"))
        .unwrap_or(false);
    if !merge_failed {
        return Err(ApiError::bad_request(format!(
            "Work unit '{chunk}' is not in a merge failure state"
        )));
    }

    let config = state.store.load_config()?;
    let manager = WorktreeManager::new(&state.project_dir, &config.base_branch);

    let retry = async {
        if manager.has_changes(&chunk).await? {
            manager.merge_to_base(&chunk, true).await
        } else {
            manager.delete_branch(&chunk).await
        }
    };
    if let Err(e) = retry.await {
        unit.attention_reason = Some(e.to_string());
        state.store.update_work_unit(&unit)?;
        if is_form(&headers) {
            return Ok(Redirect::to("/").into_response());
        }
        return Err(ApiError::bad_request(format!("Merge still failing: {e}")));
    }

    unit.status = WorkUnitStatus::Done;
    unit.attention_reason = None;
    unit.session_id = None;
    state.store.update_work_unit(&unit)?;

    // A unit reaching DONE releases its dependents, same as the scheduler's
    // completion path.
    for mut dependent in state.store.list_blocked_by(&chunk)? {
        dependent.blocked_by.retain(|c| c != &chunk);
        if dependent.blocked_by.is_empty() && dependent.status == WorkUnitStatus::Blocked {
            dependent.status = WorkUnitStatus::Ready;
        }
        state.store.update_work_unit(&dependent)?;
    }

    if is_form(&headers) {
        return Ok(Redirect::to("/").into_response());
    }
    Ok(Json(json!({
        "chunk": chunk,
        "status": "done",
        "message": "Merge completed successfully",
    }))
    .into_response())
}

// --- Conflicts ---

/// GET `/conflicts`: list analyses, optionally filtered by `?verdict=`.
pub async fn list_conflicts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<serde_json::Value>> {
    let verdict = params
        .get("verdict")
        .map(|raw| {
            ConflictVerdict::from_str(raw)
                .map_err(|_| ApiError::bad_request(format!("Invalid verdict: {raw}")))
        })
        .transpose()?;
    let conflicts = state.store.list_all_conflicts(verdict)?;
    let count = conflicts.len();
    Ok(Json(json!({
        "conflicts": conflicts,
        "count": count,
    })))
}

/// GET `/conflicts/{chunk}`: analyses involving one chunk.
pub async fn conflicts_for_chunk(
    State(state): State<Arc<AppState>>,
    Path(chunk): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let conflicts = state.store.list_conflicts_for_chunk(&chunk)?;
    let count = conflicts.len();
    Ok(Json(json!({
        "chunk": chunk,
        "conflicts": conflicts,
        "count": count,
    })))
}

#[derive(Deserialize)]
pub struct AnalyzeBody {
    chunk_a: String,
    chunk_b: String,
}

/// POST `/conflicts/analyze`: run (or fetch) the oracle for a pair.
pub async fn analyze_conflict(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzeBody>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.chunk_a.is_empty() || body.chunk_b.is_empty() {
        return Err(ApiError::bad_request(
            "Missing required fields: chunk_a and chunk_b",
        ));
    }
    let oracle = ConflictOracle::new(&state.project_dir, state.store.clone());
    let analysis = oracle.analyze_conflict(&body.chunk_a, &body.chunk_b)?;
    Ok(Json(serde_json::to_value(analysis).map_err(ChunkflowError::from)?))
}
