//! ComfyUI process, WebSocket and REST client library.
//!
//! Launches a local ComfyUI server, waits for it to come up, submits
//! workflow graphs over HTTP and follows their execution over
//! WebSocket until completion.

pub mod api;
pub mod backend;
pub mod client;
pub mod messages;
pub mod readiness;
pub mod runner;
pub mod server;

pub use backend::{BackendError, ComfyUI, ExecutionBackend};
