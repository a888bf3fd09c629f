use std::path::PathBuf;

use txt2img_comfyui::server::ServerLaunch;
use txt2img_weights::WeightsDownloader;

const DEFAULT_COMFYUI_ADDR: &str = "127.0.0.1:8188";
const DEFAULT_COMFYUI_DIR: &str = "ComfyUI";
const DEFAULT_PYTHON: &str = "python";
const DEFAULT_OUTPUT_DIR: &str = "/tmp/outputs";
const DEFAULT_INPUT_DIR: &str = "/tmp/inputs";
const DEFAULT_CHECKPOINTS_DIR: &str = "ComfyUI/models/checkpoints";
const DEFAULT_WEIGHTS_BASE_URL: &str =
    "https://weights.replicate.delivery/default/comfy-ui/checkpoints";

/// Predictor configuration loaded from environment variables.
///
/// All fields have defaults matching the container layout the
/// predictor is deployed in.
#[derive(Debug, Clone)]
pub struct PredictorConfig {
    /// Address the ComfyUI server listens on (default: `127.0.0.1`).
    pub comfyui_host: String,
    /// Port the ComfyUI server listens on (default: `8188`).
    pub comfyui_port: u16,
    /// ComfyUI checkout containing `main.py`.
    pub comfyui_dir: PathBuf,
    /// Interpreter used to launch ComfyUI.
    pub python: String,
    /// Scratch directory the backend writes images to.
    pub output_dir: PathBuf,
    /// Scratch directory the backend reads uploads from.
    pub input_dir: PathBuf,
    /// Where checkpoint archives are extracted.
    pub checkpoints_dir: PathBuf,
    /// Base URL of the `{name}.tar` weight archives.
    pub weights_base_url: String,
    /// Fetch program used for weights (default: `pget`).
    pub fetch_program: String,
    /// Download the checkpoint during setup.
    pub prefetch_checkpoint: bool,
}

/// A variable was set to a value that cannot be used.
#[derive(Debug, thiserror::Error)]
#[error("{var} has an invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            comfyui_host: "127.0.0.1".into(),
            comfyui_port: 8188,
            comfyui_dir: DEFAULT_COMFYUI_DIR.into(),
            python: DEFAULT_PYTHON.into(),
            output_dir: DEFAULT_OUTPUT_DIR.into(),
            input_dir: DEFAULT_INPUT_DIR.into(),
            checkpoints_dir: DEFAULT_CHECKPOINTS_DIR.into(),
            weights_base_url: DEFAULT_WEIGHTS_BASE_URL.into(),
            fetch_program: txt2img_weights::downloader::DEFAULT_FETCH_PROGRAM.into(),
            prefetch_checkpoint: false,
        }
    }
}

impl PredictorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var               | Default                          |
    /// |-----------------------|----------------------------------|
    /// | `COMFYUI_ADDR`        | `127.0.0.1:8188`                 |
    /// | `COMFYUI_DIR`         | `ComfyUI`                        |
    /// | `COMFYUI_PYTHON`      | `python`                         |
    /// | `OUTPUT_DIR`          | `/tmp/outputs`                   |
    /// | `INPUT_DIR`           | `/tmp/inputs`                    |
    /// | `CHECKPOINTS_DIR`     | `ComfyUI/models/checkpoints`     |
    /// | `WEIGHTS_BASE_URL`    | replicate weights CDN            |
    /// | `WEIGHTS_FETCH_BIN`   | `pget`                           |
    /// | `PREFETCH_CHECKPOINT` | `false`                          |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let (comfyui_host, comfyui_port) =
            parse_addr("COMFYUI_ADDR", &get("COMFYUI_ADDR", DEFAULT_COMFYUI_ADDR))?;

        let prefetch_checkpoint = match lookup("PREFETCH_CHECKPOINT") {
            Some(value) => parse_bool("PREFETCH_CHECKPOINT", &value)?,
            None => false,
        };

        Ok(Self {
            comfyui_host,
            comfyui_port,
            comfyui_dir: get("COMFYUI_DIR", DEFAULT_COMFYUI_DIR).into(),
            python: get("COMFYUI_PYTHON", DEFAULT_PYTHON),
            output_dir: get("OUTPUT_DIR", DEFAULT_OUTPUT_DIR).into(),
            input_dir: get("INPUT_DIR", DEFAULT_INPUT_DIR).into(),
            checkpoints_dir: get("CHECKPOINTS_DIR", DEFAULT_CHECKPOINTS_DIR).into(),
            weights_base_url: get("WEIGHTS_BASE_URL", DEFAULT_WEIGHTS_BASE_URL),
            fetch_program: get(
                "WEIGHTS_FETCH_BIN",
                txt2img_weights::downloader::DEFAULT_FETCH_PROGRAM,
            ),
            prefetch_checkpoint,
        })
    }

    /// Launch parameters for the backend server.
    pub fn server_launch(&self) -> ServerLaunch {
        ServerLaunch {
            python: self.python.clone(),
            comfyui_dir: self.comfyui_dir.clone(),
            host: self.comfyui_host.clone(),
            port: self.comfyui_port,
        }
    }

    pub fn downloader(&self) -> WeightsDownloader {
        WeightsDownloader::new(self.fetch_program.clone())
    }
}

fn parse_addr(var: &'static str, value: &str) -> Result<(String, u16), ConfigError> {
    let invalid = |reason: &str| ConfigError {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let (host, port) = value
        .rsplit_once(':')
        .ok_or_else(|| invalid("expected host:port"))?;
    if host.is_empty() {
        return Err(invalid("host must not be empty"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|_| invalid("port must be a valid u16"))?;
    Ok((host.to_string(), port))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError {
            var,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = PredictorConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.comfyui_host, "127.0.0.1");
        assert_eq!(config.comfyui_port, 8188);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/outputs"));
        assert_eq!(config.input_dir, PathBuf::from("/tmp/inputs"));
        assert_eq!(config.fetch_program, "pget");
        assert!(!config.prefetch_checkpoint);
    }

    #[test]
    fn variables_override_defaults() {
        let config = PredictorConfig::from_lookup(lookup_from(&[
            ("COMFYUI_ADDR", "0.0.0.0:9000"),
            ("OUTPUT_DIR", "/scratch/out"),
            ("PREFETCH_CHECKPOINT", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(config.comfyui_host, "0.0.0.0");
        assert_eq!(config.comfyui_port, 9000);
        assert_eq!(config.output_dir, PathBuf::from("/scratch/out"));
        assert!(config.prefetch_checkpoint);

        let launch = config.server_launch();
        assert_eq!(launch.port, 9000);
    }

    #[test]
    fn bad_port_is_rejected() {
        let err = PredictorConfig::from_lookup(lookup_from(&[("COMFYUI_ADDR", "localhost:http")]))
            .unwrap_err();
        assert_eq!(err.var, "COMFYUI_ADDR");
    }

    #[test]
    fn address_without_port_is_rejected() {
        assert!(parse_addr("COMFYUI_ADDR", "localhost").is_err());
        assert!(parse_addr("COMFYUI_ADDR", ":8188").is_err());
    }

    #[test]
    fn bad_bool_is_rejected() {
        let err = PredictorConfig::from_lookup(lookup_from(&[("PREFETCH_CHECKPOINT", "maybe")]))
            .unwrap_err();
        assert_eq!(err.var, "PREFETCH_CHECKPOINT");
    }
}
