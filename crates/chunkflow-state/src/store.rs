use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::broadcast;
use tracing::debug;

use chunkflow_core::{ChunkflowError, ChunkflowResult, ConflictVerdict, WorkUnitStatus};

use crate::events::{AttentionAction, StateEvent};
use crate::model::{
    canonical_pair, ConflictAnalysis, OrchestratorConfig, StatusTransition, WorkUnit,
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS work_units (
    chunk               TEXT PRIMARY KEY,
    phase               TEXT NOT NULL,
    status              TEXT NOT NULL,
    priority            INTEGER NOT NULL DEFAULT 0,
    blocked_by          TEXT NOT NULL DEFAULT '[]',
    worktree            TEXT,
    session_id          TEXT,
    pending_answer      TEXT,
    attention_reason    TEXT,
    conflict_verdicts   TEXT NOT NULL DEFAULT '{}',
    conflict_override   TEXT,
    displaced_chunk     TEXT,
    completion_retries  INTEGER NOT NULL DEFAULT 0,
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS status_history (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    chunk       TEXT NOT NULL,
    old_status  TEXT,
    new_status  TEXT NOT NULL,
    at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_status_history_chunk_at
    ON status_history (chunk, at);

CREATE TABLE IF NOT EXISTS conflicts (
    chunk_a     TEXT NOT NULL,
    chunk_b     TEXT NOT NULL,
    verdict     TEXT NOT NULL,
    reason      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (chunk_a, chunk_b)
);

CREATE TABLE IF NOT EXISTS config (
    key    TEXT PRIMARY KEY,
    value  TEXT NOT NULL
);
";

const UNIT_COLUMNS: &str = "chunk, phase, status, priority, blocked_by, worktree, session_id, \
     pending_answer, attention_reason, conflict_verdicts, conflict_override, displaced_chunk, \
     completion_retries, created_at, updated_at";

fn ts(dt: &DateTime<Utc>) -> String {
    // Fixed-width timestamps keep lexicographic ORDER BY chronological.
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> ChunkflowResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| ChunkflowError::State(format!("bad timestamp '{raw}': {e}")))
}

fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<WorkUnit> {
    let blocked_by: String = row.get("blocked_by")?;
    let verdicts: String = row.get("conflict_verdicts")?;
    let phase: String = row.get("phase")?;
    let status: String = row.get("status")?;
    let conflict_override: Option<String> = row.get("conflict_override")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    let convert = |e: ChunkflowError| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())),
        )
    };

    Ok(WorkUnit {
        chunk: row.get("chunk")?,
        phase: phase.parse().map_err(convert)?,
        status: status.parse().map_err(convert)?,
        priority: row.get("priority")?,
        blocked_by: serde_json::from_str(&blocked_by).unwrap_or_default(),
        worktree: row.get("worktree")?,
        session_id: row.get("session_id")?,
        pending_answer: row.get("pending_answer")?,
        attention_reason: row.get("attention_reason")?,
        conflict_verdicts: serde_json::from_str(&verdicts).unwrap_or_default(),
        conflict_override: conflict_override
            .map(|v| v.parse::<ConflictVerdict>().map_err(convert))
            .transpose()?,
        displaced_chunk: row.get("displaced_chunk")?,
        completion_retries: row.get("completion_retries")?,
        created_at: parse_ts(&created_at).map_err(convert)?,
        updated_at: parse_ts(&updated_at).map_err(convert)?,
    })
}

/// SQLite-backed single-writer state store.
///
/// The connection sits behind one mutex; every public operation is a single
/// serialised transaction, so readers only ever observe committed snapshots.
pub struct StateStore {
    conn: Mutex<Connection>,
    events: broadcast::Sender<StateEvent>,
}

impl StateStore {
    /// Open (creating if necessary) the store at `db_path`.
    pub fn open(db_path: &Path) -> ChunkflowResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)
            .map_err(|e| ChunkflowError::State(format!("failed to open {}: {e}", db_path.display())))?;
        Self::from_connection(conn)
    }

    /// An in-memory store, for tests.
    pub fn in_memory() -> ChunkflowResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ChunkflowError::State(format!("failed to open in-memory db: {e}")))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> ChunkflowResult<Self> {
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .ok();
        conn.execute_batch(SCHEMA)
            .map_err(|e| ChunkflowError::State(format!("failed to initialize schema: {e}")))?;
        let (events, _) = broadcast::channel(256);
        Ok(Self {
            conn: Mutex::new(conn),
            events,
        })
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: StateEvent) {
        // Best-effort: no subscribers is fine.
        let _ = self.events.send(event);
    }

    fn emit_unit_update(&self, unit: &WorkUnit) {
        self.emit(StateEvent::WorkUnitUpdate {
            chunk: unit.chunk.clone(),
            status: unit.status.to_string(),
            phase: unit.phase.to_string(),
            attention_reason: unit.attention_reason.clone(),
        });
    }

    fn emit_attention_delta(
        &self,
        chunk: &str,
        old: Option<WorkUnitStatus>,
        new: WorkUnitStatus,
        reason: Option<&str>,
    ) {
        let was = old == Some(WorkUnitStatus::NeedsAttention);
        let is = new == WorkUnitStatus::NeedsAttention;
        if !was && is {
            self.emit(StateEvent::AttentionUpdate {
                action: AttentionAction::Added,
                chunk: chunk.to_string(),
                reason: reason.map(str::to_string),
            });
        } else if was && !is {
            self.emit(StateEvent::AttentionUpdate {
                action: AttentionAction::Resolved,
                chunk: chunk.to_string(),
                reason: None,
            });
        }
    }

    /// Insert a new work unit; fails with `Conflict` if the chunk exists.
    ///
    /// Logs the initial `(null → status)` history row in the same transaction.
    pub fn create_work_unit(&self, unit: &WorkUnit) -> ChunkflowResult<WorkUnit> {
        {
            let mut guard = self.conn.lock();
            let tx = guard
                .transaction()
                .map_err(|e| ChunkflowError::State(e.to_string()))?;

            let exists: Option<String> = tx
                .query_row(
                    "SELECT chunk FROM work_units WHERE chunk = ?1",
                    params![unit.chunk],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| ChunkflowError::State(e.to_string()))?;
            if exists.is_some() {
                return Err(ChunkflowError::Conflict(format!(
                    "Work unit for chunk '{}' already exists",
                    unit.chunk
                )));
            }

            tx.execute(
                &format!("INSERT INTO work_units ({UNIT_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"),
                params![
                    unit.chunk,
                    unit.phase.to_string(),
                    unit.status.to_string(),
                    unit.priority,
                    serde_json::to_string(&unit.blocked_by)?,
                    unit.worktree,
                    unit.session_id,
                    unit.pending_answer,
                    unit.attention_reason,
                    serde_json::to_string(&unit.conflict_verdicts)?,
                    unit.conflict_override.map(|v| v.to_string()),
                    unit.displaced_chunk,
                    unit.completion_retries,
                    ts(&unit.created_at),
                    ts(&unit.updated_at),
                ],
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;

            tx.execute(
                "INSERT INTO status_history (chunk, old_status, new_status, at) VALUES (?1, NULL, ?2, ?3)",
                params![unit.chunk, unit.status.to_string(), ts(&Utc::now())],
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;

            tx.commit().map_err(|e| ChunkflowError::State(e.to_string()))?;
        }

        debug!(chunk = %unit.chunk, status = %unit.status, "work unit created");
        self.emit_unit_update(unit);
        self.emit_attention_delta(
            &unit.chunk,
            None,
            unit.status,
            unit.attention_reason.as_deref(),
        );
        Ok(unit.clone())
    }

    /// Fetch a work unit by chunk name.
    pub fn get_work_unit(&self, chunk: &str) -> ChunkflowResult<Option<WorkUnit>> {
        let guard = self.conn.lock();
        guard
            .query_row(
                &format!("SELECT {UNIT_COLUMNS} FROM work_units WHERE chunk = ?1"),
                params![chunk],
                unit_from_row,
            )
            .optional()
            .map_err(|e| ChunkflowError::State(e.to_string()))
    }

    /// Persist a modified work unit.
    ///
    /// Stamps `updated_at`, appends exactly one history row when the status
    /// changed, and broadcasts the update. Returns the stored unit.
    pub fn update_work_unit(&self, unit: &WorkUnit) -> ChunkflowResult<WorkUnit> {
        let mut stored = unit.clone();
        stored.updated_at = Utc::now();
        let old_status;

        {
            let mut guard = self.conn.lock();
            let tx = guard
                .transaction()
                .map_err(|e| ChunkflowError::State(e.to_string()))?;

            let previous: Option<String> = tx
                .query_row(
                    "SELECT status FROM work_units WHERE chunk = ?1",
                    params![unit.chunk],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| ChunkflowError::State(e.to_string()))?;

            let Some(previous) = previous else {
                return Err(ChunkflowError::NotFound(format!(
                    "Work unit '{}' not found",
                    unit.chunk
                )));
            };
            old_status = previous.parse::<WorkUnitStatus>().ok();

            tx.execute(
                "UPDATE work_units SET phase = ?2, status = ?3, priority = ?4, blocked_by = ?5, \
                 worktree = ?6, session_id = ?7, pending_answer = ?8, attention_reason = ?9, \
                 conflict_verdicts = ?10, conflict_override = ?11, displaced_chunk = ?12, \
                 completion_retries = ?13, updated_at = ?14 WHERE chunk = ?1",
                params![
                    stored.chunk,
                    stored.phase.to_string(),
                    stored.status.to_string(),
                    stored.priority,
                    serde_json::to_string(&stored.blocked_by)?,
                    stored.worktree,
                    stored.session_id,
                    stored.pending_answer,
                    stored.attention_reason,
                    serde_json::to_string(&stored.conflict_verdicts)?,
                    stored.conflict_override.map(|v| v.to_string()),
                    stored.displaced_chunk,
                    stored.completion_retries,
                    ts(&stored.updated_at),
                ],
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;

            if old_status != Some(stored.status) {
                tx.execute(
                    "INSERT INTO status_history (chunk, old_status, new_status, at) VALUES (?1, ?2, ?3, ?4)",
                    params![
                        stored.chunk,
                        old_status.map(|s| s.to_string()),
                        stored.status.to_string(),
                        ts(&Utc::now()),
                    ],
                )
                .map_err(|e| ChunkflowError::State(e.to_string()))?;
            }

            tx.commit().map_err(|e| ChunkflowError::State(e.to_string()))?;
        }

        self.emit_unit_update(&stored);
        self.emit_attention_delta(
            &stored.chunk,
            old_status,
            stored.status,
            stored.attention_reason.as_deref(),
        );
        Ok(stored)
    }

    /// Delete a work unit. Returns whether a row was removed.
    pub fn delete_work_unit(&self, chunk: &str) -> ChunkflowResult<bool> {
        let old = self.get_work_unit(chunk)?;
        let deleted = {
            let guard = self.conn.lock();
            guard
                .execute("DELETE FROM work_units WHERE chunk = ?1", params![chunk])
                .map_err(|e| ChunkflowError::State(e.to_string()))?
                > 0
        };

        if deleted {
            self.emit(StateEvent::WorkUnitUpdate {
                chunk: chunk.to_string(),
                status: "DELETED".to_string(),
                phase: String::new(),
                attention_reason: None,
            });
            if old.map(|u| u.status) == Some(WorkUnitStatus::NeedsAttention) {
                self.emit(StateEvent::AttentionUpdate {
                    action: AttentionAction::Resolved,
                    chunk: chunk.to_string(),
                    reason: None,
                });
            }
        }
        Ok(deleted)
    }

    /// All work units, optionally filtered by status, ordered by creation.
    pub fn list_work_units(
        &self,
        status: Option<WorkUnitStatus>,
    ) -> ChunkflowResult<Vec<WorkUnit>> {
        let guard = self.conn.lock();
        let run = |sql: &str, args: &[&dyn rusqlite::ToSql]| -> ChunkflowResult<Vec<WorkUnit>> {
            let mut stmt = guard
                .prepare(sql)
                .map_err(|e| ChunkflowError::State(e.to_string()))?;
            let rows = stmt
                .query_map(args, unit_from_row)
                .map_err(|e| ChunkflowError::State(e.to_string()))?;
            rows.collect::<Result<Vec<_>, _>>()
                .map_err(|e| ChunkflowError::State(e.to_string()))
        };

        match status {
            Some(status) => {
                let status_str = status.to_string();
                run(
                    &format!(
                        "SELECT {UNIT_COLUMNS} FROM work_units WHERE status = ?1 ORDER BY created_at ASC"
                    ),
                    &[&status_str as &dyn rusqlite::ToSql],
                )
            }
            None => run(
                &format!("SELECT {UNIT_COLUMNS} FROM work_units ORDER BY created_at ASC"),
                &[],
            ),
        }
    }

    /// The ready queue: READY units by priority descending, oldest first.
    pub fn get_ready_queue(&self, limit: Option<usize>) -> ChunkflowResult<Vec<WorkUnit>> {
        let guard = self.conn.lock();
        let limit = limit.map_or(-1_i64, |n| n as i64);
        let mut stmt = guard
            .prepare(&format!(
                "SELECT {UNIT_COLUMNS} FROM work_units WHERE status = 'READY' \
                 ORDER BY priority DESC, created_at ASC LIMIT ?1"
            ))
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        let rows = stmt
            .query_map(params![limit], unit_from_row)
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ChunkflowError::State(e.to_string()))
    }

    /// NEEDS_ATTENTION units with their `blocks_count`, ordered by
    /// `(blocks_count DESC, updated_at ASC)`.
    pub fn get_attention_queue(&self) -> ChunkflowResult<Vec<(WorkUnit, i64)>> {
        let all = self.list_work_units(None)?;
        let mut attention: Vec<(WorkUnit, i64)> = all
            .iter()
            .filter(|u| u.status == WorkUnitStatus::NeedsAttention)
            .map(|u| {
                let blocks = all
                    .iter()
                    .filter(|other| other.blocked_by.contains(&u.chunk))
                    .count() as i64;
                (u.clone(), blocks)
            })
            .collect();
        attention.sort_by(|(a, a_blocks), (b, b_blocks)| {
            b_blocks
                .cmp(a_blocks)
                .then(a.updated_at.cmp(&b.updated_at))
        });
        Ok(attention)
    }

    /// Units whose `blocked_by` contains `chunk`.
    pub fn list_blocked_by(&self, chunk: &str) -> ChunkflowResult<Vec<WorkUnit>> {
        Ok(self
            .list_work_units(None)?
            .into_iter()
            .filter(|u| u.blocked_by.iter().any(|b| b == chunk))
            .collect())
    }

    /// Work unit counts per status.
    pub fn count_by_status(&self) -> ChunkflowResult<BTreeMap<String, i64>> {
        let guard = self.conn.lock();
        let mut stmt = guard
            .prepare("SELECT status, COUNT(*) FROM work_units GROUP BY status")
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        rows.collect::<Result<BTreeMap<_, _>, _>>()
            .map_err(|e| ChunkflowError::State(e.to_string()))
    }

    /// The status-transition history of one chunk, oldest first.
    pub fn get_status_history(&self, chunk: &str) -> ChunkflowResult<Vec<StatusTransition>> {
        let guard = self.conn.lock();
        let mut stmt = guard
            .prepare(
                "SELECT chunk, old_status, new_status, at FROM status_history \
                 WHERE chunk = ?1 ORDER BY id ASC",
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        let rows = stmt
            .query_map(params![chunk], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| ChunkflowError::State(e.to_string()))?;

        let mut history = Vec::new();
        for row in rows {
            let (chunk, old, new, at) = row.map_err(|e| ChunkflowError::State(e.to_string()))?;
            history.push(StatusTransition {
                chunk,
                old_status: old.map(|s| s.parse()).transpose()?,
                new_status: new.parse()?,
                at: parse_ts(&at)?,
            });
        }
        Ok(history)
    }

    /// Read a raw config value.
    pub fn get_config(&self, key: &str) -> ChunkflowResult<Option<String>> {
        let guard = self.conn.lock();
        guard
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| ChunkflowError::State(e.to_string()))
    }

    /// Write a raw config value.
    pub fn set_config(&self, key: &str, value: &str) -> ChunkflowResult<()> {
        let guard = self.conn.lock();
        guard
            .execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        Ok(())
    }

    /// The effective orchestrator config: defaults overlaid with stored keys.
    ///
    /// Unparsable stored values fall back to the default for that key.
    pub fn load_config(&self) -> ChunkflowResult<OrchestratorConfig> {
        let mut config = OrchestratorConfig::default();
        if let Some(v) = self.get_config("max_agents")? {
            if let Ok(n) = v.parse::<usize>() {
                if n >= 1 {
                    config.max_agents = n;
                }
            }
        }
        if let Some(v) = self.get_config("dispatch_interval_seconds")? {
            if let Ok(n) = v.parse::<f64>() {
                if n > 0.0 {
                    config.dispatch_interval_seconds = n;
                }
            }
        }
        if let Some(v) = self.get_config("max_completion_retries")? {
            if let Ok(n) = v.parse::<u32>() {
                config.max_completion_retries = n;
            }
        }
        if let Some(v) = self.get_config("base_branch")? {
            if !v.is_empty() {
                config.base_branch = v;
            }
        }
        if let Some(v) = self.get_config("shutdown_timeout_seconds")? {
            if let Ok(n) = v.parse::<u64>() {
                config.shutdown_timeout_seconds = n;
            }
        }
        Ok(config)
    }

    /// Upsert a conflict analysis for its canonical pair.
    pub fn upsert_conflict(&self, analysis: &ConflictAnalysis) -> ChunkflowResult<()> {
        let guard = self.conn.lock();
        guard
            .execute(
                "INSERT INTO conflicts (chunk_a, chunk_b, verdict, reason, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(chunk_a, chunk_b) DO UPDATE SET \
                 verdict = excluded.verdict, reason = excluded.reason, created_at = excluded.created_at",
                params![
                    analysis.chunk_a,
                    analysis.chunk_b,
                    analysis.verdict.to_string(),
                    analysis.reason,
                    ts(&analysis.created_at),
                ],
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        Ok(())
    }

    /// The stored analysis for a pair, in either argument order.
    pub fn get_conflict(&self, a: &str, b: &str) -> ChunkflowResult<Option<ConflictAnalysis>> {
        let (chunk_a, chunk_b) = canonical_pair(a, b);
        let guard = self.conn.lock();
        let raw = guard
            .query_row(
                "SELECT chunk_a, chunk_b, verdict, reason, created_at FROM conflicts \
                 WHERE chunk_a = ?1 AND chunk_b = ?2",
                params![chunk_a, chunk_b],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        raw.map(|(a, b, verdict, reason, created_at)| {
            Ok(ConflictAnalysis {
                chunk_a: a,
                chunk_b: b,
                verdict: verdict.parse()?,
                reason,
                created_at: parse_ts(&created_at)?,
            })
        })
        .transpose()
    }

    /// All analyses involving `chunk`, newest first.
    pub fn list_conflicts_for_chunk(&self, chunk: &str) -> ChunkflowResult<Vec<ConflictAnalysis>> {
        Ok(self
            .list_all_conflicts(None)?
            .into_iter()
            .filter(|c| c.involves(chunk))
            .collect())
    }

    /// All analyses, newest first, optionally filtered by verdict.
    pub fn list_all_conflicts(
        &self,
        verdict: Option<ConflictVerdict>,
    ) -> ChunkflowResult<Vec<ConflictAnalysis>> {
        let guard = self.conn.lock();
        let mut stmt = guard
            .prepare(
                "SELECT chunk_a, chunk_b, verdict, reason, created_at FROM conflicts \
                 ORDER BY created_at DESC",
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })
            .map_err(|e| ChunkflowError::State(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (a, b, v, reason, created_at) =
                row.map_err(|e| ChunkflowError::State(e.to_string()))?;
            let parsed: ConflictVerdict = v.parse()?;
            if verdict.map_or(true, |want| want == parsed) {
                out.push(ConflictAnalysis {
                    chunk_a: a,
                    chunk_b: b,
                    verdict: parsed,
                    reason,
                    created_at: parse_ts(&created_at)?,
                });
            }
        }
        Ok(out)
    }

    /// Drop every stored analysis involving `chunk`. Returns the count.
    pub fn clear_conflicts_for_chunk(&self, chunk: &str) -> ChunkflowResult<usize> {
        let guard = self.conn.lock();
        guard
            .execute(
                "DELETE FROM conflicts WHERE chunk_a = ?1 OR chunk_b = ?1",
                params![chunk],
            )
            .map_err(|e| ChunkflowError::State(e.to_string()))
    }
}
