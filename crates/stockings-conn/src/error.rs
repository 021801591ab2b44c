use std::time::Duration;

use stockings_frame::FrameError;
use stockings_transport::TransportError;

/// Errors surfaced by a [`crate::Connection`].
#[derive(Debug, thiserror::Error)]
pub enum ConnError {
    /// The handshake has not completed (or never will).
    #[error("connection not ready (handshake incomplete)")]
    NotReady,

    /// The payload exceeds the configured maximum message length.
    #[error("message too large ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The connection is no longer active.
    #[error("connection closed")]
    Closed,

    /// Handshake failed.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// A pre-write or post-read hook rejected a message.
    #[error("message hook failed: {0}")]
    Hook(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An I/O error occurred while setting up the connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A blocking helper gave up waiting.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl From<FrameError> for ConnError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::MessageTooLarge { size, max } => ConnError::MessageTooLarge { size, max },
            FrameError::ConnectionClosed => ConnError::Closed,
            FrameError::Io(err) => ConnError::Io(err),
            other => ConnError::Frame(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConnError>;
