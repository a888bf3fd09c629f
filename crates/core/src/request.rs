//! Prediction request: the per-call parameters of a text-to-image run.
//!
//! A request is built (or deserialized) once per call, checked with
//! [`PredictionRequest::ensure_valid`] before anything reaches the
//! backend, and dropped when the call returns.

use rand::Rng;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::sampling::{Sampler, Scheduler};

/// Exclusive upper bound of generated seeds (`2^32 - 1`).
pub const SEED_UPPER_BOUND: u64 = u32::MAX as u64;

pub const DEFAULT_PROMPT: &str = "a photo of an astronaut riding a unicorn";
pub const DEFAULT_NEGATIVE_PROMPT: &str = "ugly, disfigured, low quality, blurry, nsfw";

/// Parameters for a single prediction.
///
/// Every field has a default, so a JSON body may omit any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PredictionRequest {
    /// Text describing the image to generate.
    pub prompt: String,
    /// The negative prompt to guide image generation.
    pub negative_prompt: String,
    /// Number of diffusion steps.
    #[validate(range(min = 1, max = 100))]
    pub num_inference_steps: u32,
    /// Scale for classifier-free guidance.
    #[validate(range(min = 0.0, max = 30.0))]
    pub guidance_scale: f64,
    /// Fixed seed; a random one is drawn per call when absent.
    pub seed: Option<u64>,
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Number of images generated in one batch.
    #[validate(range(min = 1, max = 10))]
    pub num_outputs: u32,
    /// Sampling algorithm run by the KSampler node.
    pub sampler_name: Sampler,
    /// Noise schedule used by the sampler.
    pub scheduler: Scheduler,
    /// Accepted for interface compatibility; the graph has no safety checker node.
    pub disable_safety_checker: bool,
}

impl Default for PredictionRequest {
    fn default() -> Self {
        Self {
            prompt: DEFAULT_PROMPT.to_string(),
            negative_prompt: DEFAULT_NEGATIVE_PROMPT.to_string(),
            num_inference_steps: 17,
            guidance_scale: 7.5,
            seed: None,
            width: 768,
            height: 768,
            num_outputs: 1,
            sampler_name: Sampler::default(),
            scheduler: Scheduler::default(),
            disable_safety_checker: false,
        }
    }
}

impl PredictionRequest {
    /// Reject out-of-range parameters.
    ///
    /// Steps must be in `[1, 100]`, guidance in `[0, 30]` and the output
    /// count in `[1, 10]`.
    pub fn ensure_valid(&self) -> Result<(), CoreError> {
        // NaN slips through range comparisons.
        if !self.guidance_scale.is_finite() {
            return Err(CoreError::Validation(format!(
                "guidance_scale must be a finite number, got {}",
                self.guidance_scale
            )));
        }
        self.validate()?;
        Ok(())
    }

    /// The seed for this call: the caller's, or a freshly generated one.
    pub fn resolve_seed(&self) -> u64 {
        match self.seed {
            Some(seed) => seed,
            None => {
                let seed = generate_seed();
                tracing::info!(seed, "Random seed set to: {seed}");
                seed
            }
        }
    }
}

/// Draw a seed uniformly from `[0, 2^32 - 1)`.
pub fn generate_seed() -> u64 {
    rand::rng().random_range(0..SEED_UPPER_BOUND)
}
