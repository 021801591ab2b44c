/// Errors that can occur while preparing a socket for the pump.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An I/O error occurred on the socket or a readiness descriptor.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The descriptor cannot be watched by the `select(2)` backend.
    #[error("descriptor {fd} exceeds select limit (max {max})")]
    DescriptorOutOfRange { fd: i32, max: usize },

    /// An unrecognised readiness backend name.
    #[error("unknown readiness backend '{0}' (expected 'event' or 'timed')")]
    UnknownReadiness(String),

    /// The socket is not connected to a peer.
    #[error("socket is not connected")]
    NotConnected,
}

pub type Result<T> = std::result::Result<T, TransportError>;
