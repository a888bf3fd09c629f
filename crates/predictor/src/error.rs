use std::path::PathBuf;

use txt2img_comfyui::BackendError;
use txt2img_core::error::CoreError;
use txt2img_core::workflow::WorkflowError;
use txt2img_weights::WeightsError;

/// Errors surfaced by a prediction session.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    #[error(transparent)]
    InvalidRequest(#[from] CoreError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Weights download failed: {0}")]
    Weights(#[from] WeightsError),

    #[error("Scratch directory {path}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
