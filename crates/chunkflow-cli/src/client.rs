use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use chunkflow_server::read_daemon_info;

/// Errors surfaced to the operator; every variant exits with code 1.
#[derive(Debug, Error)]
pub enum CliError {
    /// No live daemon pid file was found.
    #[error("orchestrator daemon is not running (no pid file)")]
    DaemonNotRunning,

    /// The daemon answered with an error body.
    #[error("{message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// The daemon's error message.
        message: String,
    },

    /// Transport-level failure talking to the daemon.
    #[error("failed to reach daemon: {0}")]
    Transport(#[from] reqwest::Error),

    /// Local failure (pid file, process spawn, config).
    #[error("{0}")]
    Local(String),
}

/// Thin HTTP client for the daemon's control plane.
pub struct DaemonClient {
    base: String,
    http: reqwest::Client,
}

impl DaemonClient {
    /// Connect using the pid file under `project_dir`.
    pub fn connect(project_dir: &Path) -> Result<Self, CliError> {
        let info = read_daemon_info(project_dir).ok_or(CliError::DaemonNotRunning)?;
        Ok(Self::from_base_url(format!(
            "http://{}:{}",
            info.host, info.port
        )))
    }

    /// Connect to an explicit base URL (tests, remote tunnels).
    pub fn from_base_url(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn handle(&self, response: reqwest::Response) -> Result<Value, CliError> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(body);
        }
        let message = body
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| format!("daemon returned HTTP {status}"));
        Err(CliError::Api {
            status: status.as_u16(),
            message,
        })
    }

    /// GET a JSON document.
    pub async fn get(&self, path: &str) -> Result<Value, CliError> {
        let response = self.http.get(format!("{}{path}", self.base)).send().await?;
        self.handle(response).await
    }

    /// POST a JSON body.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, CliError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        self.handle(response).await
    }

    /// PATCH a JSON body.
    pub async fn patch(&self, path: &str, body: &Value) -> Result<Value, CliError> {
        let response = self
            .http
            .patch(format!("{}{path}", self.base))
            .json(body)
            .send()
            .await?;
        self.handle(response).await
    }

    /// DELETE a resource.
    pub async fn delete(&self, path: &str) -> Result<Value, CliError> {
        let response = self
            .http
            .delete(format!("{}{path}", self.base))
            .send()
            .await?;
        self.handle(response).await
    }
}
