//! Local ComfyUI server process.
//!
//! [`ServerLaunch`] describes how to start `main.py` from a ComfyUI
//! checkout; [`ComfyUIServer`] owns the resulting child process. The
//! child is killed when the handle is dropped.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use tokio::process::{Child, Command};

/// Launch parameters for the ComfyUI server.
#[derive(Debug, Clone)]
pub struct ServerLaunch {
    /// Python interpreter used to run `main.py`.
    pub python: String,
    /// ComfyUI checkout containing `main.py`.
    pub comfyui_dir: PathBuf,
    /// Address passed to `--listen`.
    pub host: String,
    /// HTTP and WebSocket port.
    pub port: u16,
}

/// Errors raised while starting or probing the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to spawn ComfyUI server: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Failed to query ComfyUI server process: {0}")]
    Status(#[source] std::io::Error),

    #[error("ComfyUI server exited before becoming ready ({0})")]
    Exited(ExitStatus),
}

impl ServerLaunch {
    /// Arguments passed to the interpreter.
    pub fn args(&self, output_dir: &Path, input_dir: &Path) -> Vec<OsString> {
        vec![
            "main.py".into(),
            "--listen".into(),
            self.host.clone().into(),
            "--port".into(),
            self.port.to_string().into(),
            "--output-directory".into(),
            output_dir.into(),
            "--input-directory".into(),
            input_dir.into(),
            "--disable-metadata".into(),
        ]
    }

    /// Start the server in the background.
    ///
    /// Returns as soon as the process is spawned; use
    /// [`crate::readiness::wait_until_ready`] before submitting work.
    /// Server output is inherited so it ends up next to our own logs.
    pub fn spawn(&self, output_dir: &Path, input_dir: &Path) -> Result<ComfyUIServer, ServerError> {
        tracing::info!(
            python = %self.python,
            dir = %self.comfyui_dir.display(),
            host = %self.host,
            port = self.port,
            "Starting ComfyUI server",
        );

        let child = Command::new(&self.python)
            .args(self.args(output_dir, input_dir))
            .current_dir(&self.comfyui_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(ServerError::Spawn)?;

        tracing::info!(pid = child.id(), "ComfyUI server process spawned");
        Ok(ComfyUIServer { child })
    }
}

/// Handle to a running ComfyUI server process.
pub struct ComfyUIServer {
    child: Child,
}

impl ComfyUIServer {
    /// Exit status if the process has terminated, without blocking.
    pub fn exit_status(&mut self) -> Result<Option<ExitStatus>, ServerError> {
        self.child.try_wait().map_err(ServerError::Status)
    }

    /// Kill the process and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(error = %e, "Failed to stop ComfyUI server");
        } else {
            tracing::info!("ComfyUI server stopped");
        }
    }
}
