//! Length-prefixed message connections over stream sockets.
//!
//! stockings turns a connected TCP (or Unix-domain) socket into a queue of
//! whole messages. A background pump does all socket I/O without blocking
//! the caller; an optional handshake gates the connection until both ends
//! agree to talk.
//!
//! # Crate Structure
//!
//! - [`transport`]: sockets, readiness backends and the pump waker
//! - [`frame`]: header-width rules, the frame codec, send queue and receive assembler
//! - [`conn`]: [`conn::Connection`], hooks and the version-exchange handshake

/// Re-export transport types.
pub mod transport {
    pub use stockings_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use stockings_frame::*;
}

/// Re-export connection types.
pub mod conn {
    pub use stockings_conn::*;
}

pub use stockings_conn::{CloseReason, ConnError, Connection, ConnectionBuilder, ConnectionConfig};
