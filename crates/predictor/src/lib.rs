//! `txt2img-predictor` library crate.
//!
//! Session lifecycle and configuration for running text-to-image
//! predictions on a local ComfyUI server. The binary entrypoint lives in
//! `main.rs`.

pub mod config;
pub mod error;
pub mod outputs;
pub mod session;

pub use config::PredictorConfig;
pub use error::PredictError;
pub use session::Predictor;
