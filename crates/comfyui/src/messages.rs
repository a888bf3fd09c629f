//! Frames pushed by ComfyUI over `/ws`.
//!
//! Every text frame is `{"type": ..., "data": {...}}`. Only the kinds the
//! runner reacts to are modelled; anything else fails to parse and is
//! skipped by the caller.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ComfyUIMessage {
    Status(StatusData),
    ExecutionStart(PromptData),
    /// Nodes whose outputs were reused from the previous run.
    ExecutionCached(ExecutionCachedData),
    /// `node: None` marks the end of the prompt.
    Executing(ExecutingData),
    /// Sampler step counter.
    Progress(ProgressData),
    Executed(ExecutedData),
    ExecutionSuccess(PromptData),
    ExecutionInterrupted(InterruptedData),
    ExecutionError(ErrorData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
struct QueueStatus {
    exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
struct ExecInfo {
    queue_remaining: u32,
}

impl StatusData {
    /// Prompts still waiting in, or running on, the server queue.
    pub fn queue_remaining(&self) -> u32 {
        self.status.exec_info.queue_remaining
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PromptData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: u32,
    pub max: u32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Whole-number percentage; 0 when the server reports no total.
    pub fn percent(&self) -> u32 {
        if self.max == 0 {
            return 0;
        }
        self.value.saturating_mul(100) / self.max
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_type: String,
    pub exception_message: String,
}

/// Decode one text frame. Unknown `type`s are an error.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}
