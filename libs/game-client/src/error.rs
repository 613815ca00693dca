use thiserror::Error;

/// Failures of a single transport. The connection manager recovers from all
/// of them by retrying or escalating; none reach the presentation layer.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The server ended the connection on purpose.
    #[error("connection closed by server")]
    ClosedByServer,

    /// The connection dropped without a close from the server.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// Whether the server told us to leave, as opposed to losing contact.
    pub fn is_server_close(&self) -> bool {
        matches!(self, Self::ClosedByServer)
    }
}

/// Errors returned by [`ConnectionManager`](crate::ConnectionManager) calls.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("connection manager is no longer running")]
    ChannelClosed,
}
