//! Submit a workflow and block until ComfyUI reports it finished.
//!
//! Reads raw frames from the ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants, and feeds them to a
//! [`PromptTracker`] until the tracked prompt completes or fails.
//! Messages belonging to other prompts are logged and ignored.

use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::api::{ComfyUIApi, ComfyUIApiError};
use crate::client::ComfyUIConnection;
use crate::messages::{parse_message, ComfyUIMessage};

/// Errors raised while running a single workflow.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to submit workflow: {0}")]
    Submit(#[from] ComfyUIApiError),

    #[error("Execution failed at node {node_id} ({exception_type}): {message}")]
    ExecutionFailed {
        node_id: String,
        exception_type: String,
        message: String,
    },

    #[error("Execution of prompt {0} was interrupted")]
    Interrupted(String),

    #[error("WebSocket closed before prompt {0} completed")]
    ConnectionClosed(String),

    #[error("WebSocket receive error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

/// Follows the lifecycle of one queued prompt.
#[derive(Debug, Clone)]
pub struct PromptTracker {
    prompt_id: String,
}

impl PromptTracker {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    /// Interpret one message.
    ///
    /// Returns `Some(Ok(()))` once the tracked prompt has finished,
    /// `Some(Err(_))` if it failed, and `None` while it is still running
    /// (or when the message concerns another prompt).
    pub fn observe(&self, msg: &ComfyUIMessage) -> Option<Result<(), RunError>> {
        match msg {
            ComfyUIMessage::Executing(data) if self.is_mine(data.prompt_id.as_deref()) => {
                match &data.node {
                    Some(node) => {
                        tracing::debug!(prompt_id = %self.prompt_id, node = %node, "Executing node");
                        None
                    }
                    // node == None means execution is complete for this prompt.
                    None => {
                        tracing::info!(prompt_id = %self.prompt_id, "Execution completed (all nodes done)");
                        Some(Ok(()))
                    }
                }
            }
            ComfyUIMessage::ExecutionSuccess(data) if data.prompt_id == self.prompt_id => {
                tracing::info!(prompt_id = %self.prompt_id, "Execution succeeded");
                Some(Ok(()))
            }
            ComfyUIMessage::ExecutionError(data) if data.prompt_id == self.prompt_id => {
                tracing::error!(
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                Some(Err(RunError::ExecutionFailed {
                    node_id: data.node_id.clone(),
                    exception_type: data.exception_type.clone(),
                    message: data.exception_message.clone(),
                }))
            }
            ComfyUIMessage::ExecutionInterrupted(data) if data.prompt_id == self.prompt_id => {
                tracing::warn!(prompt_id = %data.prompt_id, node_id = ?data.node_id, "Execution interrupted");
                Some(Err(RunError::Interrupted(data.prompt_id.clone())))
            }
            ComfyUIMessage::ExecutionStart(data) if data.prompt_id == self.prompt_id => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution started");
                None
            }
            ComfyUIMessage::ExecutionCached(data) if data.prompt_id == self.prompt_id => {
                tracing::debug!(
                    prompt_id = %data.prompt_id,
                    cached_nodes = data.nodes.len(),
                    "Execution used cache",
                );
                None
            }
            ComfyUIMessage::Progress(data) if self.is_mine(data.prompt_id.as_deref()) => {
                tracing::debug!(
                    value = data.value,
                    max = data.max,
                    percent = data.percent(),
                    "Generation progress",
                );
                None
            }
            ComfyUIMessage::Executed(data) if data.prompt_id == self.prompt_id => {
                tracing::debug!(prompt_id = %data.prompt_id, node = %data.node, "Node executed with output");
                None
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.queue_remaining(),
                    "ComfyUI queue status",
                );
                None
            }
            other => {
                tracing::trace!(?other, "Ignoring message for another prompt");
                None
            }
        }
    }

    /// Progress messages from older servers omit the prompt id; those
    /// are attributed to the tracked prompt.
    fn is_mine(&self, prompt_id: Option<&str>) -> bool {
        prompt_id.map_or(true, |id| id == self.prompt_id)
    }
}

/// Read WebSocket frames until the tracked prompt finishes.
///
/// Binary frames (preview images) are ignored. Unparseable text frames
/// are logged and skipped.
pub async fn wait_for_completion<S>(stream: &mut S, tracker: &PromptTracker) -> Result<(), RunError>
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result? {
            Message::Text(text) => match parse_message(&text) {
                Ok(msg) => {
                    if let Some(outcome) = tracker.observe(&msg) {
                        return outcome;
                    }
                }
                Err(e) => {
                    tracing::debug!(error = %e, raw_message = %text, "Skipping unrecognised ComfyUI message");
                }
            },
            Message::Binary(_) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Message::Close(frame) => {
                tracing::warn!(?frame, "ComfyUI WebSocket closed");
                break;
            }
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    Err(RunError::ConnectionClosed(tracker.prompt_id().to_string()))
}

/// Queue `workflow` on the server and wait for it on `conn`.
///
/// The connection must be open before submission so that no progress
/// message for the new prompt is missed. Returns the prompt id.
pub async fn run_workflow<W: Serialize + ?Sized>(
    api: &ComfyUIApi,
    conn: &mut ComfyUIConnection,
    workflow: &W,
) -> Result<String, RunError> {
    let response = api.submit_workflow(workflow, &conn.client_id).await?;
    tracing::info!(
        prompt_id = %response.prompt_id,
        queue_position = response.number,
        "Workflow submitted to ComfyUI",
    );

    let tracker = PromptTracker::new(response.prompt_id.clone());
    wait_for_completion(&mut conn.ws_stream, &tracker).await?;
    Ok(response.prompt_id)
}
