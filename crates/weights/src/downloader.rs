//! Weight archive fetcher.
//!
//! Runs `pget -xf <url> <dest>` to download an archive and extract it
//! in one pass, then reports how long it took and how large the
//! extracted file is.

use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::time::Instant;

use tokio::process::Command;

/// Default fetch program.
pub const DEFAULT_FETCH_PROGRAM: &str = "pget";

/// Errors raised while fetching weights.
#[derive(Debug, thiserror::Error)]
pub enum WeightsError {
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Fetching {weight} from {url} failed ({status})")]
    FetchFailed {
        weight: String,
        url: String,
        status: ExitStatus,
    },

    #[error("Failed to inspect {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// URL of the `{name}.tar` archive under `base_url`.
pub fn checkpoint_url(base_url: &str, name: &str) -> String {
    format!("{}/{name}.tar", base_url.trim_end_matches('/'))
}

/// Downloads weight archives with an external fetch tool.
#[derive(Debug, Clone)]
pub struct WeightsDownloader {
    program: String,
}

impl Default for WeightsDownloader {
    fn default() -> Self {
        Self::new(DEFAULT_FETCH_PROGRAM)
    }
}

impl WeightsDownloader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Fetch `url` and extract it into `dest`.
    ///
    /// Always downloads, even if the weights are already present. A
    /// non-zero exit of the fetch tool is an error. After a successful
    /// fetch the file `dest/<basename of weight>` is stat'ed for the
    /// size report; if it is not there (the archive extracted under
    /// another name) only the elapsed time is logged.
    pub async fn download(&self, weight: &str, url: &str, dest: &Path) -> Result<(), WeightsError> {
        tracing::info!(weight, dest = %dest.display(), "Downloading {weight} to {}", dest.display());
        let start = Instant::now();

        let status = Command::new(&self.program)
            .args(fetch_args(url, dest))
            .status()
            .await
            .map_err(|source| WeightsError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !status.success() {
            tracing::error!(weight, url, %status, "Weights download failed");
            return Err(WeightsError::FetchFailed {
                weight: weight.to_string(),
                url: url.to_string(),
                status,
            });
        }

        let elapsed_secs = start.elapsed().as_secs_f64();
        let path = dest.join(basename(weight));

        match file_size_mb(&path).await? {
            Some(size_mb) => tracing::info!(
                weight,
                elapsed_secs,
                size_mb,
                "Downloaded {weight} in {elapsed_secs:.2}s, size: {size_mb:.2}MB",
            ),
            None => tracing::info!(weight, elapsed_secs, "Downloaded {weight} in {elapsed_secs:.2}s"),
        }
        Ok(())
    }

    /// Fetch `{base_url}/{name}.tar` into `dest`.
    pub async fn download_checkpoint(
        &self,
        name: &str,
        base_url: &str,
        dest: &Path,
    ) -> Result<(), WeightsError> {
        self.download(name, &checkpoint_url(base_url, name), dest).await
    }
}

fn fetch_args<'a>(url: &'a str, dest: &'a Path) -> [&'a std::ffi::OsStr; 5] {
    [
        "--log-level".as_ref(),
        "warn".as_ref(),
        "-xf".as_ref(),
        url.as_ref(),
        dest.as_os_str(),
    ]
}

fn basename(weight: &str) -> &str {
    Path::new(weight)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(weight)
}

/// Size of `path` in megabytes, or `None` if it does not exist.
async fn file_size_mb(path: &Path) -> Result<Option<f64>, WeightsError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(Some(meta.len() as f64 / (1024.0 * 1024.0))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(WeightsError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_url_appends_tar() {
        assert_eq!(
            checkpoint_url("https://weights.example.com/checkpoints", "model.safetensors"),
            "https://weights.example.com/checkpoints/model.safetensors.tar"
        );
        assert_eq!(
            checkpoint_url("https://weights.example.com/checkpoints/", "m.ckpt"),
            "https://weights.example.com/checkpoints/m.ckpt.tar"
        );
    }

    #[test]
    fn fetch_args_are_quiet_extract() {
        let args = fetch_args("https://x/y.tar", Path::new("/models"));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(args, ["--log-level", "warn", "-xf", "https://x/y.tar", "/models"]);
    }

    #[test]
    fn basename_strips_directories() {
        assert_eq!(basename("sdxl/model.safetensors"), "model.safetensors");
        assert_eq!(basename("model.safetensors"), "model.safetensors");
    }

    #[tokio::test]
    async fn file_size_in_megabytes() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("weights.bin");
        tokio::fs::write(&path, vec![0u8; 512 * 1024]).await.expect("write");

        let size = file_size_mb(&path).await.expect("stat");
        assert_eq!(size, Some(0.5));
        assert_eq!(file_size_mb(&dir.path().join("missing")).await.expect("stat"), None);
    }
}
