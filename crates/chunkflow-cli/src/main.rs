//! `chunkflow`: operator CLI for the chunk orchestrator daemon.
//!
//! Every command prints a one-line human summary unless `--json` is given.
//! Exit codes: 0 on success, 1 on client or daemon errors.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use chunkflow_agent::ProcessAgentRuntime;
use chunkflow_cli::{CliError, DaemonClient};
use chunkflow_server::{daemon_alive, pid_file_path, read_daemon_info, run_daemon};

#[derive(Parser)]
#[command(name = "chunkflow", about = "parallel chunk orchestrator")]
struct Cli {
    /// Project directory (defaults to the current directory).
    #[arg(long, global = true)]
    project_dir: Option<PathBuf>,

    /// Print raw JSON instead of one-line summaries.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Orchestrator daemon operations.
    Orch {
        #[command(subcommand)]
        action: OrchAction,
    },
    /// Direct work-unit operations.
    WorkUnit {
        #[command(subcommand)]
        action: WorkUnitAction,
    },
}

#[derive(Subcommand)]
enum OrchAction {
    /// Start the daemon in the background.
    Start {
        /// Host to bind (default 127.0.0.1).
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to bind (0 = ephemeral).
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
    /// Run the daemon in the foreground (used by `start`).
    #[command(hide = true)]
    Run {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 0)]
        port: u16,
    },
    /// Stop the running daemon.
    Stop,
    /// Show daemon status.
    Status,
    /// List work units.
    Ps,
    /// Validate a chunk and add it to the work pool.
    Inject {
        /// Chunk name.
        chunk: String,
        /// Phase override (GOAL|PLAN|IMPLEMENT|COMPLETE).
        #[arg(long)]
        phase: Option<String>,
        /// Ready-queue priority.
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Show the ready queue.
    Queue,
    /// Change a work unit's priority.
    Prioritize {
        /// Chunk name.
        chunk: String,
        /// New priority.
        priority: i64,
    },
    /// Show or update orchestrator configuration.
    Config {
        /// Set the concurrent-agent cap.
        #[arg(long)]
        max_agents: Option<i64>,
        /// Set the dispatch interval in seconds.
        #[arg(long)]
        dispatch_interval: Option<f64>,
        /// Set the completion-retry bound.
        #[arg(long)]
        max_completion_retries: Option<i64>,
        /// Set the base branch.
        #[arg(long)]
        base_branch: Option<String>,
    },
    /// Resolve an ASK_OPERATOR conflict.
    Resolve {
        /// The chunk awaiting resolution.
        chunk: String,
        /// The conflicting chunk.
        other_chunk: String,
        /// parallelize | serialize
        verdict: String,
    },
    /// Retry a failed merge to base.
    RetryMerge {
        /// Chunk name.
        chunk: String,
    },
}

#[derive(Subcommand)]
enum WorkUnitAction {
    /// Create a work unit directly (no chunk validation).
    Create {
        /// Chunk name.
        chunk: String,
        /// Initial phase.
        #[arg(long, default_value = "GOAL")]
        phase: String,
        /// Initial status.
        #[arg(long, default_value = "READY")]
        status: String,
        /// Ready-queue priority.
        #[arg(long, default_value_t = 0)]
        priority: i64,
    },
    /// Show one work unit.
    Show {
        /// Chunk name.
        chunk: String,
    },
    /// Set a work unit's status.
    Status {
        /// Chunk name.
        chunk: String,
        /// New status.
        status: String,
    },
    /// Delete a work unit.
    Delete {
        /// Chunk name.
        chunk: String,
    },
}

#[derive(Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    server: FileServerConfig,
}

#[derive(Deserialize, Default)]
struct FileServerConfig {
    host: Option<String>,
    port: Option<u16>,
}

fn load_file_config(project_dir: &Path) -> FileConfig {
    let path = project_dir.join("chunkflow.toml");
    std::fs::read_to_string(path)
        .ok()
        .and_then(|raw| toml::from_str(&raw).ok())
        .unwrap_or_default()
}

struct Output {
    json: bool,
}

impl Output {
    fn emit(&self, value: &Value, human: String) {
        if self.json {
            println!("{value}");
        } else {
            println!("{human}");
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let project_dir = cli
        .project_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));
    let out = Output { json: cli.json };

    match run(cli.command, &project_dir, &out).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, project_dir: &Path, out: &Output) -> Result<(), CliError> {
    match command {
        Commands::Orch { action } => run_orch(action, project_dir, out).await,
        Commands::WorkUnit { action } => run_work_unit(action, project_dir, out).await,
    }
}

async fn run_orch(action: OrchAction, project_dir: &Path, out: &Output) -> Result<(), CliError> {
    match action {
        OrchAction::Start { host, port } => start_daemon(project_dir, &host, port, out).await,
        OrchAction::Run { host, port } => {
            let file_config = load_file_config(project_dir);
            let host = file_config.server.host.unwrap_or(host);
            let port = file_config.server.port.unwrap_or(port);
            let runtime = Arc::new(ProcessAgentRuntime::new());
            run_daemon(project_dir, &host, port, runtime)
                .await
                .map_err(|e| CliError::Local(e.to_string()))
        }
        OrchAction::Stop => stop_daemon(project_dir, out).await,
        OrchAction::Status => {
            match DaemonClient::connect(project_dir) {
                Err(CliError::DaemonNotRunning) => {
                    out.emit(&json!({ "running": false }), "daemon not running".to_string());
                    Ok(())
                }
                Err(e) => Err(e),
                Ok(client) => match client.get("/status").await {
                    Ok(body) => {
                        let counts = body["work_unit_counts"]
                            .as_object()
                            .map(|m| {
                                m.iter()
                                    .map(|(k, v)| format!("{k}={v}"))
                                    .collect::<Vec<_>>()
                                    .join(" ")
                            })
                            .unwrap_or_default();
                        let human = format!(
                            "daemon running (pid {}, up {:.0}s) {counts}",
                            body["pid"], body["uptime_seconds"].as_f64().unwrap_or(0.0)
                        );
                        out.emit(&body, human);
                        Ok(())
                    }
                    Err(CliError::Transport(_)) => {
                        out.emit(&json!({ "running": false }), "daemon not running".to_string());
                        Ok(())
                    }
                    Err(e) => Err(e),
                },
            }
        }
        OrchAction::Ps => {
            let client = DaemonClient::connect(project_dir)?;
            let body = client.get("/work-units").await?;
            let lines = render_units(&body["work_units"]);
            out.emit(&body, lines);
            Ok(())
        }
        OrchAction::Inject {
            chunk,
            phase,
            priority,
        } => {
            let client = DaemonClient::connect(project_dir)?;
            let mut request = json!({ "chunk": chunk, "priority": priority });
            if let Some(phase) = phase {
                request["phase"] = json!(phase);
            }
            let body = client.post("/work-units/inject", &request).await?;
            let mut human = format!(
                "injected '{}' (phase {}, status {})",
                body["chunk"].as_str().unwrap_or(&chunk),
                body["phase"].as_str().unwrap_or("?"),
                body["status"].as_str().unwrap_or("?"),
            );
            if let Some(warnings) = body["warnings"].as_array() {
                for warning in warnings {
                    human.push_str(&format!("\nwarning: {}", warning.as_str().unwrap_or("")));
                }
            }
            out.emit(&body, human);
            Ok(())
        }
        OrchAction::Queue => {
            let client = DaemonClient::connect(project_dir)?;
            let body = client.get("/work-units/queue").await?;
            let lines = render_units(&body["work_units"]);
            out.emit(&body, lines);
            Ok(())
        }
        OrchAction::Prioritize { chunk, priority } => {
            let client = DaemonClient::connect(project_dir)?;
            let body = client
                .patch(
                    &format!("/work-units/{chunk}/priority"),
                    &json!({ "priority": priority }),
                )
                .await?;
            out.emit(&body, format!("'{chunk}' priority set to {priority}"));
            Ok(())
        }
        OrchAction::Config {
            max_agents,
            dispatch_interval,
            max_completion_retries,
            base_branch,
        } => {
            let client = DaemonClient::connect(project_dir)?;
            let mut patch = serde_json::Map::new();
            if let Some(v) = max_agents {
                patch.insert("max_agents".to_string(), json!(v));
            }
            if let Some(v) = dispatch_interval {
                patch.insert("dispatch_interval_seconds".to_string(), json!(v));
            }
            if let Some(v) = max_completion_retries {
                patch.insert("max_completion_retries".to_string(), json!(v));
            }
            if let Some(v) = base_branch {
                patch.insert("base_branch".to_string(), json!(v));
            }

            let body = if patch.is_empty() {
                client.get("/config").await?
            } else {
                client.patch("/config", &Value::Object(patch)).await?
            };
            let human = format!(
                "max_agents={} dispatch_interval={}s max_completion_retries={} base_branch={}",
                body["max_agents"],
                body["dispatch_interval_seconds"],
                body["max_completion_retries"],
                body["base_branch"].as_str().unwrap_or("?"),
            );
            out.emit(&body, human);
            Ok(())
        }
        OrchAction::Resolve {
            chunk,
            other_chunk,
            verdict,
        } => {
            let client = DaemonClient::connect(project_dir)?;
            let body = client
                .post(
                    &format!("/work-units/{chunk}/resolve"),
                    &json!({ "other_chunk": other_chunk, "verdict": verdict }),
                )
                .await?;
            out.emit(
                &body,
                format!(
                    "resolved '{chunk}' vs '{other_chunk}' as {}",
                    body["verdict"].as_str().unwrap_or(&verdict)
                ),
            );
            Ok(())
        }
        OrchAction::RetryMerge { chunk } => {
            let client = DaemonClient::connect(project_dir)?;
            let body = client
                .post(&format!("/work-units/{chunk}/retry-merge"), &json!({}))
                .await?;
            out.emit(&body, format!("merge retried for '{chunk}': done"));
            Ok(())
        }
    }
}

async fn run_work_unit(
    action: WorkUnitAction,
    project_dir: &Path,
    out: &Output,
) -> Result<(), CliError> {
    let client = DaemonClient::connect(project_dir)?;
    match action {
        WorkUnitAction::Create {
            chunk,
            phase,
            status,
            priority,
        } => {
            let body = client
                .post(
                    "/work-units",
                    &json!({
                        "chunk": chunk,
                        "phase": phase,
                        "status": status,
                        "priority": priority,
                    }),
                )
                .await?;
            out.emit(
                &body,
                format!(
                    "created '{}' (phase {}, status {})",
                    body["chunk"].as_str().unwrap_or(&chunk),
                    body["phase"].as_str().unwrap_or("?"),
                    body["status"].as_str().unwrap_or("?"),
                ),
            );
            Ok(())
        }
        WorkUnitAction::Show { chunk } => {
            let body = client.get(&format!("/work-units/{chunk}")).await?;
            let human = format!(
                "{} phase={} status={} priority={} blocked_by={}",
                chunk,
                body["phase"].as_str().unwrap_or("?"),
                body["status"].as_str().unwrap_or("?"),
                body["priority"],
                body["blocked_by"],
            );
            out.emit(&body, human);
            Ok(())
        }
        WorkUnitAction::Status { chunk, status } => {
            let body = client
                .patch(&format!("/work-units/{chunk}"), &json!({ "status": status }))
                .await?;
            out.emit(
                &body,
                format!("'{chunk}' status set to {}", body["status"].as_str().unwrap_or(&status)),
            );
            Ok(())
        }
        WorkUnitAction::Delete { chunk } => {
            let body = client.delete(&format!("/work-units/{chunk}")).await?;
            out.emit(&body, format!("deleted '{chunk}'"));
            Ok(())
        }
    }
}

fn render_units(units: &Value) -> String {
    let Some(units) = units.as_array() else {
        return "no work units".to_string();
    };
    if units.is_empty() {
        return "no work units".to_string();
    }
    let mut lines = vec![format!(
        "{:<24} {:<10} {:<16} {:>8}",
        "CHUNK", "PHASE", "STATUS", "PRIORITY"
    )];
    for unit in units {
        lines.push(format!(
            "{:<24} {:<10} {:<16} {:>8}",
            unit["chunk"].as_str().unwrap_or("?"),
            unit["phase"].as_str().unwrap_or("?"),
            unit["status"].as_str().unwrap_or("?"),
            unit["priority"],
        ));
    }
    lines.join("\n")
}

async fn start_daemon(
    project_dir: &Path,
    host: &str,
    port: u16,
    out: &Output,
) -> Result<(), CliError> {
    if let Some(existing) = read_daemon_info(project_dir) {
        if daemon_alive(&existing).await {
            return Err(CliError::Local(format!(
                "daemon already running (pid {}, {}:{})",
                existing.pid, existing.host, existing.port
            )));
        }
    }

    let exe = std::env::current_exe()
        .map_err(|e| CliError::Local(format!("cannot locate chunkflow binary: {e}")))?;
    let log_dir = project_dir.join(".ve").join("orchestrator");
    std::fs::create_dir_all(&log_dir)
        .map_err(|e| CliError::Local(format!("cannot create {}: {e}", log_dir.display())))?;
    let log_file = std::fs::File::create(log_dir.join("daemon.log"))
        .map_err(|e| CliError::Local(format!("cannot create daemon log: {e}")))?;
    let log_err = log_file
        .try_clone()
        .map_err(|e| CliError::Local(format!("cannot clone daemon log handle: {e}")))?;

    let child = std::process::Command::new(exe)
        .arg("--project-dir")
        .arg(project_dir)
        .arg("orch")
        .arg("run")
        .arg("--host")
        .arg(host)
        .arg("--port")
        .arg(port.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(log_file)
        .stderr(log_err)
        .spawn()
        .map_err(|e| CliError::Local(format!("failed to spawn daemon: {e}")))?;

    // Wait for the daemon to write its pid file and accept connections.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if let Some(info) = read_daemon_info(project_dir) {
            if info.pid == child.id() && daemon_alive(&info).await {
                out.emit(
                    &json!({ "pid": info.pid, "host": info.host, "port": info.port }),
                    format!("daemon started (pid {}, {}:{})", info.pid, info.host, info.port),
                );
                return Ok(());
            }
        }
    }
    Err(CliError::Local(
        "daemon did not come up within 10s; see .ve/orchestrator/daemon.log".to_string(),
    ))
}

async fn stop_daemon(project_dir: &Path, out: &Output) -> Result<(), CliError> {
    let info = read_daemon_info(project_dir).ok_or(CliError::DaemonNotRunning)?;

    let pid = nix::unistd::Pid::from_raw(info.pid as i32);
    nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM)
        .map_err(|e| CliError::Local(format!("failed to signal pid {}: {e}", info.pid)))?;

    // The daemon removes its pid file on clean shutdown.
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if !pid_file_path(project_dir).exists() {
            out.emit(
                &json!({ "stopped": true, "pid": info.pid }),
                format!("daemon stopped (pid {})", info.pid),
            );
            return Ok(());
        }
    }
    Err(CliError::Local(format!(
        "daemon (pid {}) did not stop within 10s",
        info.pid
    )))
}
