//! HTTP side of a ComfyUI server: queueing prompts and managing the
//! execution queue.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A prompt id the server never hands out. `GET /history/<id>` for it
/// answers `{}` once the HTTP server is listening.
const PROBE_PROMPT_ID: &str = "123";

/// HTTP client for one ComfyUI server. Cheap to clone; clones share
/// the connection pool.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Id that progress frames on the WebSocket refer to.
    pub prompt_id: String,
    /// Queue position at submission time.
    pub number: i32,
}

#[derive(Serialize)]
struct SubmitRequest<'a, W: ?Sized> {
    prompt: &'a W,
    client_id: &'a str,
}

/// Errors from the ComfyUI HTTP endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Non-2xx answer; `body` is kept verbatim since ComfyUI puts its
    /// node validation errors there.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError { status: u16, body: String },
}

impl ComfyUIApi {
    /// `api_url` is the server root, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Server root this client talks to.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Queue a graph. `client_id` must be the id of the WebSocket that
    /// should receive its progress frames.
    pub async fn submit_workflow<W: Serialize + ?Sized>(
        &self,
        workflow: &W,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let request = self.client.post(self.endpoint("prompt")).json(&SubmitRequest {
            prompt: workflow,
            client_id,
        });
        let response = send(request).await?;
        Ok(response.json().await?)
    }

    /// Remove everything still waiting in the queue. Does not stop the
    /// prompt that is already running.
    pub async fn clear_queue(&self) -> Result<(), ComfyUIApiError> {
        let request = self
            .client
            .post(self.endpoint("queue"))
            .json(&serde_json::json!({ "clear": true }));
        send(request).await.map(drop)
    }

    /// Stop whatever prompt is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        send(self.client.post(self.endpoint("interrupt"))).await.map(drop)
    }

    /// Outputs and timing of a finished prompt, keyed by prompt id.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        self.get_json(&format!("history/{prompt_id}")).await
    }

    /// Succeeds once the server answers HTTP requests.
    pub async fn ping(&self) -> Result<(), ComfyUIApiError> {
        self.get_history(PROBE_PROMPT_ID).await.map(drop)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ComfyUIApiError> {
        let response = send(self.client.get(self.endpoint(path))).await?;
        Ok(response.json().await?)
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{path}", self.api_url.trim_end_matches('/'))
    }
}

/// Send `request`, turning a non-2xx status into [`ComfyUIApiError::ApiError`].
async fn send(request: reqwest::RequestBuilder) -> Result<reqwest::Response, ComfyUIApiError> {
    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<unreadable body>".to_string());
    Err(ComfyUIApiError::ApiError {
        status: status.as_u16(),
        body,
    })
}
