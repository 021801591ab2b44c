use std::time::Duration;

use stockings_frame::DEFAULT_MAX_MSG_LEN;
use stockings_transport::{default_poll_interval, ReadinessKind};

/// Per-connection settings.
///
/// `None` fields fall back to the process-wide choices:
/// [`ReadinessKind::detect`] and [`default_poll_interval`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Maximum payload length; also fixes the header width. Both endpoints
    /// must use the same value.
    pub max_msg_len: usize,
    /// Readiness backend override.
    pub readiness: Option<ReadinessKind>,
    /// Wake interval override for the timed backend.
    pub poll_interval: Option<Duration>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_msg_len: DEFAULT_MAX_MSG_LEN,
            readiness: None,
            poll_interval: None,
        }
    }
}

impl ConnectionConfig {
    pub fn resolved_readiness(&self) -> ReadinessKind {
        self.readiness.unwrap_or_else(ReadinessKind::detect)
    }

    pub fn resolved_poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or_else(default_poll_interval)
    }
}
