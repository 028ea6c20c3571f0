use std::time::Duration;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No live connection to the channel.
    #[error("channel is not connected")]
    NotConnected,

    /// The channel did not answer within the allotted time.
    #[error("channel did not respond within {0:?}")]
    Timeout(Duration),

    /// The channel answered with a failure.
    #[error("channel rejected the request: {0}")]
    Rejected(String),

    /// The sidecar could not be located, started, or reached.
    #[error("sidecar: {0}")]
    Sidecar(String),

    /// The state machine task is gone.
    #[error("session task has stopped")]
    SessionClosed,

    #[error("QR rendering failed: {0}")]
    Qr(String),

    #[error(transparent)]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    #[must_use]
    pub fn sidecar(message: impl std::fmt::Display) -> Self {
        Self::Sidecar(message.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
