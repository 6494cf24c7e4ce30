use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use chunkflow_agent::AgentRuntime;
use chunkflow_core::{ChunkflowError, ChunkflowResult};
use chunkflow_orchestrator::Scheduler;
use chunkflow_state::StateStore;

use crate::server::{build_router, AppState};

/// Contents of the daemon pid file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonInfo {
    /// Daemon process id.
    pub pid: u32,
    /// Bound host.
    pub host: String,
    /// Bound port.
    pub port: u16,
    /// Start instant.
    pub started_at: DateTime<Utc>,
}

/// `.ve/orchestrator` under the project root.
pub fn orchestrator_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".ve").join("orchestrator")
}

/// The pid+port file path.
pub fn pid_file_path(project_dir: &Path) -> PathBuf {
    orchestrator_dir(project_dir).join("daemon.pid")
}

/// The state-store database path.
pub fn state_db_path(project_dir: &Path) -> PathBuf {
    orchestrator_dir(project_dir).join("state.db")
}

/// Read the pid file, if present and parseable.
pub fn read_daemon_info(project_dir: &Path) -> Option<DaemonInfo> {
    let raw = std::fs::read_to_string(pid_file_path(project_dir)).ok()?;
    serde_json::from_str(&raw).ok()
}

fn write_daemon_info(project_dir: &Path, info: &DaemonInfo) -> ChunkflowResult<()> {
    let path = pid_file_path(project_dir);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(info)?)?;
    Ok(())
}

fn remove_daemon_info(project_dir: &Path) {
    let path = pid_file_path(project_dir);
    if path.exists() {
        if let Err(e) = std::fs::remove_file(&path) {
            warn!(path = %path.display(), error = %e, "failed to remove pid file");
        }
    }
}

/// Whether the recorded daemon endpoint still accepts connections.
pub async fn daemon_alive(info: &DaemonInfo) -> bool {
    let addr = format!("{}:{}", info.host, info.port);
    matches!(
        tokio::time::timeout(Duration::from_millis(500), TcpStream::connect(&addr)).await,
        Ok(Ok(_))
    )
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let ctrl_c = tokio::signal::ctrl_c();
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = ctrl_c => {},
                _ = term.recv() => {},
            }
        }
        Err(_) => {
            let _ = ctrl_c.await;
        }
    }
}

/// Run the orchestrator daemon in the foreground until SIGTERM/SIGINT.
///
/// Binds the control plane, writes the pid file, starts the scheduler, and
/// drains it gracefully on shutdown. Refuses to start while a live daemon
/// holds the pid file; a stale pid file is replaced.
pub async fn run_daemon(
    project_dir: &Path,
    host: &str,
    port: u16,
    runtime: Arc<dyn AgentRuntime>,
) -> ChunkflowResult<()> {
    if let Some(existing) = read_daemon_info(project_dir) {
        if daemon_alive(&existing).await {
            return Err(ChunkflowError::Daemon(format!(
                "daemon already running (pid {}, {}:{})",
                existing.pid, existing.host, existing.port
            )));
        }
        warn!(pid = existing.pid, "removing stale pid file");
        remove_daemon_info(project_dir);
    }

    let store = Arc::new(StateStore::open(&state_db_path(project_dir))?);
    let scheduler = Scheduler::new(project_dir, store.clone(), runtime);
    let scheduler_task = tokio::spawn(Arc::clone(&scheduler).run());

    let state = AppState::new(store, project_dir);
    let app = build_router(state);

    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| ChunkflowError::Daemon(format!("failed to bind {host}:{port}: {e}")))?;
    let bound = listener
        .local_addr()
        .map_err(|e| ChunkflowError::Daemon(format!("failed to read bound address: {e}")))?;

    let info = DaemonInfo {
        pid: std::process::id(),
        host: host.to_string(),
        port: bound.port(),
        started_at: Utc::now(),
    };
    write_daemon_info(project_dir, &info)?;
    info!(host, port = bound.port(), pid = info.pid, "daemon listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("shutting down");
    scheduler.stop().await;
    scheduler_task.abort();
    remove_daemon_info(project_dir);

    serve_result.map_err(|e| ChunkflowError::Daemon(format!("server error: {e}")))
}
