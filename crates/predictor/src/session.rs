//! Prediction session: one backend, set up once, serving one request at
//! a time.
//!
//! [`Predictor::predict`] is not reentrant. The scratch directories are
//! wiped at the start of every call, so two overlapping calls on the
//! same directories would clobber each other; callers serialize.

use std::path::{Path, PathBuf};

use txt2img_comfyui::ExecutionBackend;
use txt2img_core::request::PredictionRequest;
use txt2img_core::workflow::{patch_workflow, CHECKPOINT, TEXT_TO_IMAGE_TEMPLATE};
use txt2img_weights::WeightsDownloader;

use crate::config::PredictorConfig;
use crate::error::PredictError;
use crate::outputs;

/// Runs text-to-image predictions on an [`ExecutionBackend`].
pub struct Predictor<B> {
    backend: B,
    config: PredictorConfig,
    downloader: WeightsDownloader,
    workflow_source: String,
    started: bool,
}

impl<B: ExecutionBackend> Predictor<B> {
    pub fn new(backend: B, config: PredictorConfig) -> Self {
        Self {
            downloader: config.downloader(),
            backend,
            config,
            workflow_source: TEXT_TO_IMAGE_TEMPLATE.to_string(),
            started: false,
        }
    }

    /// Use a different graph template. It must contain the nodes the
    /// text-to-image bindings refer to.
    pub fn with_workflow_source(mut self, source: impl Into<String>) -> Self {
        self.workflow_source = source.into();
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Prepare the session: optionally fetch the checkpoint, then start
    /// the backend.
    ///
    /// Only the first call does anything.
    pub async fn setup(&mut self) -> Result<(), PredictError> {
        if self.started {
            tracing::warn!("Predictor already set up");
            return Ok(());
        }

        if self.config.prefetch_checkpoint {
            self.downloader
                .download_checkpoint(
                    CHECKPOINT,
                    &self.config.weights_base_url,
                    &self.config.checkpoints_dir,
                )
                .await?;
        }

        self.backend
            .start(&self.config.output_dir, &self.config.input_dir)
            .await?;
        self.started = true;
        tracing::info!("Predictor setup complete");
        Ok(())
    }

    /// Drop pending backend work and recreate both scratch directories
    /// empty.
    pub async fn cleanup(&self) -> Result<(), PredictError> {
        self.backend.clear_queue().await?;
        for dir in [&self.config.output_dir, &self.config.input_dir] {
            reset_scratch(dir).await?;
        }
        Ok(())
    }

    /// Run one prediction and return the produced files.
    ///
    /// Invalid requests are rejected before the backend is touched.
    pub async fn predict(&self, request: &PredictionRequest) -> Result<Vec<PathBuf>, PredictError> {
        request.ensure_valid()?;
        if request.disable_safety_checker {
            tracing::debug!("disable_safety_checker has no effect on this workflow");
        }

        self.cleanup().await?;

        let seed = request.resolve_seed();
        let workflow = patch_workflow(&self.workflow_source, request, seed)?;

        tracing::info!(
            seed,
            steps = request.num_inference_steps,
            width = request.width,
            height = request.height,
            num_outputs = request.num_outputs,
            sampler = %request.sampler_name,
            scheduler = %request.scheduler,
            "Running prediction",
        );
        self.backend.run_workflow(&workflow).await?;

        let output_dir = &self.config.output_dir;
        outputs::collect_files(output_dir)
            .await
            .map_err(|source| PredictError::Scratch {
                path: output_dir.clone(),
                source,
            })
    }
}

async fn reset_scratch(dir: &Path) -> Result<(), PredictError> {
    outputs::reset_directory(dir)
        .await
        .map_err(|source| PredictError::Scratch {
            path: dir.to_path_buf(),
            source,
        })
}
