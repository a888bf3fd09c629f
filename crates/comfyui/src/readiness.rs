//! Exponential-backoff readiness polling for a freshly started ComfyUI
//! server.
//!
//! The server takes a while to import its node packs before the HTTP
//! endpoint answers. [`wait_until_ready`] keeps probing with increasing
//! delays until it does, and gives up only if the server process dies.

use std::time::Duration;

use crate::api::ComfyUIApi;
use crate::server::{ComfyUIServer, ServerError};

/// Probe schedule while the server boots.
pub struct ReadinessConfig {
    /// Delay after the first failed probe.
    pub initial_delay: Duration,
    /// Upper bound on the delay between probes.
    pub max_delay: Duration,
    /// Growth factor applied after every unanswered probe.
    pub multiplier: f64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

/// Delay before the probe after one that waited `current`.
///
/// The result is clamped to [`ReadinessConfig::max_delay`].
pub fn next_delay(current: Duration, config: &ReadinessConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Block until the server answers HTTP requests.
///
/// There is no deadline; the only failure is the server process
/// exiting while we wait.
pub async fn wait_until_ready(
    api: &ComfyUIApi,
    server: &mut ComfyUIServer,
    config: &ReadinessConfig,
) -> Result<(), ServerError> {
    let mut delay = config.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match api.ping().await {
            Ok(()) => {
                tracing::info!(attempt, url = %api.api_url(), "ComfyUI server is ready");
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(attempt, error = %e, "ComfyUI server not ready yet");
            }
        }

        if let Some(status) = server.exit_status()? {
            tracing::error!(%status, "ComfyUI server exited during startup");
            return Err(ServerError::Exited(status));
        }

        if attempt % 10 == 0 {
            tracing::info!(attempt, "Still waiting for ComfyUI server");
        }

        tokio::time::sleep(delay).await;
        delay = next_delay(delay, config);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::server::ServerLaunch;

    #[test]
    fn delay_doubles_after_a_miss() {
        let config = ReadinessConfig::default();
        let d = next_delay(Duration::from_millis(500), &config);
        assert_eq!(d, Duration::from_secs(1));
    }

    #[test]
    fn delay_never_exceeds_max() {
        let config = ReadinessConfig::default();
        let d = next_delay(Duration::from_secs(4), &config);
        assert_eq!(d, Duration::from_secs(5));
    }

    #[test]
    fn probe_schedule() {
        let config = ReadinessConfig::default();
        let mut delay = config.initial_delay;
        let expected = [500, 1000, 2000, 4000, 5000, 5000];

        for &expected_ms in &expected {
            assert_eq!(delay.as_millis() as u64, expected_ms);
            delay = next_delay(delay, &config);
        }
    }

    #[tokio::test]
    async fn dead_server_stops_the_wait() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let launch = ServerLaunch {
            python: "false".to_string(),
            comfyui_dir: dir.path().to_path_buf(),
            host: "127.0.0.1".to_string(),
            port: 9,
        };
        let mut server = launch
            .spawn(Path::new("/tmp/outputs"), Path::new("/tmp/inputs"))
            .expect("spawn");
        let api = ComfyUIApi::new("http://127.0.0.1:9".to_string());
        let config = ReadinessConfig {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            multiplier: 2.0,
        };

        let result = wait_until_ready(&api, &mut server, &config).await;
        assert!(matches!(result, Err(ServerError::Exited(_))));
    }
}
