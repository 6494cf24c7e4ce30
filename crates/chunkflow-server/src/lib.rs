//! REST + WebSocket control plane for the orchestrator daemon.
//!
//! The router exposes work-unit CRUD, injection, the attention queue,
//! conflict analysis and resolution, merge retry, daemon status, and an HTML
//! dashboard. Every state-store write fans out to connected WebSocket
//! clients. Daemon lifecycle (pid+port file, signal-driven shutdown) lives in
//! [`daemon`].

/// Daemon lifecycle: pid file, signals, graceful shutdown.
pub mod daemon;
/// HTML dashboard rendering.
pub mod dashboard;
/// REST handlers.
mod handlers;
/// Router and shared application state.
pub mod server;
/// WebSocket broker.
mod ws;

pub use daemon::{
    daemon_alive, pid_file_path, read_daemon_info, run_daemon, state_db_path, DaemonInfo,
};
pub use server::{build_router, AppState};
