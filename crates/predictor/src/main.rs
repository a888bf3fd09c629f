//! `txt2img-predictor` -- text-to-image predictions on a local ComfyUI.
//!
//! `predict` starts the ComfyUI server, runs one request through the
//! bundled workflow and prints the produced file paths, one per line.
//! `download-weights` fetches a single weight archive.
//!
//! Server and directory settings come from the environment (see
//! [`PredictorConfig::from_env`]); a `.env` file is honoured.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use txt2img_comfyui::ComfyUI;
use txt2img_core::request::{PredictionRequest, DEFAULT_NEGATIVE_PROMPT, DEFAULT_PROMPT};
use txt2img_core::sampling::{Sampler, Scheduler};
use txt2img_predictor::{Predictor, PredictorConfig};
use txt2img_weights::checkpoint_url;

#[derive(Parser, Debug)]
#[command(author, version, about = "Text-to-image predictions on a local ComfyUI server")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the backend and run a single prediction
    Predict(PredictArgs),
    /// Download and extract one weight archive
    DownloadWeights(DownloadArgs),
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[arg(long, default_value = DEFAULT_PROMPT)]
    prompt: String,

    /// The negative prompt to guide image generation
    #[arg(long, default_value = DEFAULT_NEGATIVE_PROMPT)]
    negative_prompt: String,

    /// Number of diffusion steps (1-100)
    #[arg(long, default_value_t = 17)]
    steps: u32,

    /// Scale for classifier-free guidance (0-30)
    #[arg(long, default_value_t = 7.5)]
    guidance_scale: f64,

    /// Random seed; leave unset to randomize
    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, default_value_t = 768)]
    width: u32,

    #[arg(long, default_value_t = 768)]
    height: u32,

    /// Number of outputs (1-10)
    #[arg(long, default_value_t = 1)]
    num_outputs: u32,

    #[arg(long, default_value_t = Sampler::Euler)]
    sampler: Sampler,

    #[arg(long, default_value_t = Scheduler::Normal)]
    scheduler: Scheduler,

    /// Disable safety checker for generated images
    #[arg(long)]
    disable_safety_checker: bool,
}

impl From<PredictArgs> for PredictionRequest {
    fn from(args: PredictArgs) -> Self {
        Self {
            prompt: args.prompt,
            negative_prompt: args.negative_prompt,
            num_inference_steps: args.steps,
            guidance_scale: args.guidance_scale,
            seed: args.seed,
            width: args.width,
            height: args.height,
            num_outputs: args.num_outputs,
            sampler_name: args.sampler,
            scheduler: args.scheduler,
            disable_safety_checker: args.disable_safety_checker,
        }
    }
}

#[derive(Args, Debug)]
struct DownloadArgs {
    /// Weight file name, e.g. `sd_xl_base_1.0.safetensors`
    name: String,

    /// Archive URL (default: `{WEIGHTS_BASE_URL}/{name}.tar`)
    #[arg(long)]
    url: Option<String>,

    /// Extraction directory (default: `CHECKPOINTS_DIR`)
    #[arg(long)]
    dest: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "txt2img_predictor=info,txt2img_comfyui=info,txt2img_weights=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = PredictorConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        comfyui = %format!("{}:{}", config.comfyui_host, config.comfyui_port),
        output_dir = %config.output_dir.display(),
        "Loaded predictor configuration",
    );

    match cli.command {
        Command::Predict(args) => predict(config, args.into()).await,
        Command::DownloadWeights(args) => download_weights(&config, args).await,
    }
}

async fn predict(config: PredictorConfig, request: PredictionRequest) -> anyhow::Result<()> {
    let backend = ComfyUI::new(config.server_launch());
    let mut predictor = Predictor::new(backend, config);

    predictor.setup().await.context("setup failed")?;
    let result = predictor.predict(&request).await;
    predictor.backend_mut().shutdown().await;

    for path in result.context("prediction failed")? {
        println!("{}", path.display());
    }
    Ok(())
}

async fn download_weights(config: &PredictorConfig, args: DownloadArgs) -> anyhow::Result<()> {
    let url = args
        .url
        .unwrap_or_else(|| checkpoint_url(&config.weights_base_url, &args.name));
    let dest = args.dest.unwrap_or_else(|| config.checkpoints_dir.clone());

    config
        .downloader()
        .download(&args.name, &url, &dest)
        .await
        .with_context(|| format!("failed to download {}", args.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn predict_defaults_match_request_defaults() {
        let cli = Cli::try_parse_from(["txt2img-predictor", "predict"]).unwrap();
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        assert_eq!(PredictionRequest::from(args), PredictionRequest::default());
    }

    #[test]
    fn predict_flags_map_onto_request() {
        let cli = Cli::try_parse_from([
            "txt2img-predictor",
            "predict",
            "--prompt",
            "a red cube",
            "--steps",
            "30",
            "--sampler",
            "dpmpp_2m_sde",
            "--scheduler",
            "karras",
            "--seed",
            "1234",
        ])
        .unwrap();
        let Command::Predict(args) = cli.command else {
            panic!("expected predict");
        };
        let request = PredictionRequest::from(args);
        assert_eq!(request.prompt, "a red cube");
        assert_eq!(request.num_inference_steps, 30);
        assert_eq!(request.sampler_name, Sampler::DpmPp2mSde);
        assert_eq!(request.scheduler, Scheduler::Karras);
        assert_eq!(request.seed, Some(1234));
    }

    #[test]
    fn unknown_sampler_flag_is_rejected() {
        let result = Cli::try_parse_from(["txt2img-predictor", "predict", "--sampler", "plms"]);
        assert!(result.is_err());
    }

    #[test]
    fn download_weights_takes_name_and_optional_overrides() {
        let cli = Cli::try_parse_from([
            "txt2img-predictor",
            "download-weights",
            "model.safetensors",
            "--dest",
            "/models",
        ])
        .unwrap();
        let Command::DownloadWeights(args) = cli.command else {
            panic!("expected download-weights");
        };
        assert_eq!(args.name, "model.safetensors");
        assert!(args.url.is_none());
        assert_eq!(args.dest, Some(PathBuf::from("/models")));
    }
}
