// ─── Server Lifecycle ───
// The collaborator the mods engine asks "is the server running?" and, on
// request, "restart it". The default implementation shells out to
// `docker compose` in the server root.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::error::{ModsError, ModsResult};

#[async_trait]
pub trait ServerControl: Send + Sync {
    async fn is_running(&self) -> bool;

    async fn request_restart(&self) -> ModsResult<()>;
}

/// `docker compose` against one service.
#[derive(Debug, Clone)]
pub struct ComposeServer {
    root: PathBuf,
    service: String,
}

impl ComposeServer {
    pub fn new(root: impl Into<PathBuf>, service: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            service: service.into(),
        }
    }

    async fn compose(&self, args: &[&str]) -> std::io::Result<std::process::Output> {
        debug!("docker compose {} {}", args.join(" "), self.service);
        Command::new("docker")
            .arg("compose")
            .args(args)
            .arg(&self.service)
            .current_dir(&self.root)
            .kill_on_drop(true)
            .output()
            .await
    }

    async fn run(&self, args: &[&str], action: &str) -> ModsResult<()> {
        let output = self
            .compose(args)
            .await
            .map_err(|e| ModsError::Lifecycle(format!("failed to {action}: {e}")))?;
        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let detail = if stderr.trim().is_empty() {
            stdout.trim().to_string()
        } else {
            stderr.trim().to_string()
        };
        Err(ModsError::Lifecycle(format!("failed to {action}: {detail}")))
    }

    /// Container id of the running service, if any.
    pub async fn container_id(&self) -> Option<String> {
        match self.compose(&["ps", "-q"]).await {
            Ok(output) if output.status.success() => {
                let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                (!id.is_empty()).then_some(id)
            }
            Ok(output) => {
                warn!(
                    "docker compose ps failed ({}); assuming the server is stopped",
                    output.status
                );
                None
            }
            Err(e) => {
                warn!("Could not run docker ({}); assuming the server is stopped", e);
                None
            }
        }
    }
}

#[async_trait]
impl ServerControl for ComposeServer {
    async fn is_running(&self) -> bool {
        self.container_id().await.is_some()
    }

    async fn request_restart(&self) -> ModsResult<()> {
        info!("Restarting service '{}'", self.service);
        self.run(&["stop"], "stop server").await?;
        self.run(&["up", "-d"], "start server").await
    }
}
