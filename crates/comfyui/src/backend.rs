//! The execution backend seam and its ComfyUI implementation.
//!
//! [`ExecutionBackend`] is the narrow contract the predictor relies on:
//! start once, clear pending work, run one graph to completion.
//! [`ComfyUI`] fulfils it against a locally launched server.

use std::future::Future;
use std::path::Path;

use txt2img_core::workflow::Workflow;

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::readiness::{wait_until_ready, ReadinessConfig};
use crate::runner::{self, RunError};
use crate::server::{ComfyUIServer, ServerError, ServerLaunch};

/// Errors surfaced by an [`ExecutionBackend`].
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Connect(#[from] ComfyUIClientError),

    #[error(transparent)]
    Run(#[from] RunError),
}

/// Something that can execute workflow graphs.
pub trait ExecutionBackend: Send + Sync {
    /// Bring the backend up, writing results to `output_dir` and reading
    /// uploads from `input_dir`.
    fn start(
        &mut self,
        output_dir: &Path,
        input_dir: &Path,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Drop any queued or running work.
    fn clear_queue(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Execute `workflow` and return once the backend reports it done.
    fn run_workflow(
        &self,
        workflow: &Workflow,
    ) -> impl Future<Output = Result<(), BackendError>> + Send;
}

/// A ComfyUI server owned by this process.
pub struct ComfyUI {
    launch: ServerLaunch,
    api: ComfyUIApi,
    client: ComfyUIClient,
    readiness: ReadinessConfig,
    server: Option<ComfyUIServer>,
}

impl ComfyUI {
    /// Create a handle for a server that will listen on
    /// `launch.host:launch.port`. Nothing is started yet.
    pub fn new(launch: ServerLaunch) -> Self {
        let address = format!("{}:{}", launch.host, launch.port);
        Self {
            api: ComfyUIApi::new(format!("http://{address}")),
            client: ComfyUIClient::new(format!("ws://{address}")),
            readiness: ReadinessConfig::default(),
            server: None,
            launch,
        }
    }

    pub fn api(&self) -> &ComfyUIApi {
        &self.api
    }

    /// Whether the server process has been started by this handle.
    pub fn is_running(&self) -> bool {
        self.server.is_some()
    }

    /// Launch the server and wait until it answers HTTP requests.
    pub async fn start_server(
        &mut self,
        output_dir: &Path,
        input_dir: &Path,
    ) -> Result<(), BackendError> {
        if self.server.is_some() {
            tracing::warn!("ComfyUI server already started");
            return Ok(());
        }

        let mut server = self.launch.spawn(output_dir, input_dir)?;
        wait_until_ready(&self.api, &mut server, &self.readiness).await?;
        self.server = Some(server);
        Ok(())
    }

    /// Open a WebSocket connection for progress messages.
    pub async fn connect(&self) -> Result<ComfyUIConnection, BackendError> {
        Ok(self.client.connect().await?)
    }

    /// Stop the server if this handle started it.
    pub async fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.shutdown().await;
        }
    }
}

impl ExecutionBackend for ComfyUI {
    async fn start(&mut self, output_dir: &Path, input_dir: &Path) -> Result<(), BackendError> {
        self.start_server(output_dir, input_dir).await
    }

    async fn clear_queue(&self) -> Result<(), BackendError> {
        self.api.clear_queue().await?;
        self.api.interrupt().await?;
        tracing::debug!("ComfyUI queue cleared");
        Ok(())
    }

    async fn run_workflow(&self, workflow: &Workflow) -> Result<(), BackendError> {
        let mut conn = self.connect().await?;
        let prompt_id = runner::run_workflow(&self.api, &mut conn, workflow).await?;
        tracing::info!(prompt_id = %prompt_id, "Workflow finished");
        Ok(())
    }
}
