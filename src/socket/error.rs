use thiserror::Error;

#[derive(Debug, Error)]
pub enum SocketError {
    #[error("WebSocket handshake failed: {0}")]
    Handshake(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

pub type Result<T> = std::result::Result<T, SocketError>;
