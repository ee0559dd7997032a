//! Error types for the DG-LAB server.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DgLabError {
    #[error("dglab io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}
