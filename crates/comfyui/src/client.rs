//! WebSocket side of a ComfyUI server.
//!
//! Each [`ComfyUIClient::connect`] opens a fresh socket under a new
//! client id. Prompts submitted with that id report their progress on it.

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Raw WebSocket stream of a ComfyUI connection.
pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// WebSocket endpoint of one ComfyUI server.
pub struct ComfyUIClient {
    ws_url: String,
}

/// An open `/ws` socket and the id it was registered under.
pub struct ComfyUIConnection {
    /// Id sent as `clientId`; prompts must be submitted with it.
    pub client_id: String,
    /// Frames from the server, progress and completion included.
    pub ws_stream: ComfyUIStream,
}

#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// The WebSocket handshake did not complete.
    #[error("Connection error: {0}")]
    Connection(String),
}

impl ComfyUIClient {
    /// `ws_url` is the server root, e.g. `ws://127.0.0.1:8188`.
    pub fn new(ws_url: String) -> Self {
        Self { ws_url }
    }

    /// Server root sockets are opened against.
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Open a new socket under a fresh UUID client id.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = socket_url(&self.ws_url, &client_id);

        let (ws_stream, _response) = connect_async(url.as_str()).await.map_err(|e| {
            ComfyUIClientError::Connection(format!("{}: {e}", self.ws_url))
        })?;
        tracing::debug!(client_id = %client_id, url = %self.ws_url, "WebSocket connected");

        Ok(ComfyUIConnection {
            client_id,
            ws_stream,
        })
    }
}

fn socket_url(ws_url: &str, client_id: &str) -> String {
    format!("{}/ws?clientId={client_id}", ws_url.trim_end_matches('/'))
}
