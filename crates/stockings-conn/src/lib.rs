//! Message-oriented connections over stream sockets.
//!
//! A [`Connection`] owns one connected socket and two background threads: a
//! pump that performs every non-blocking read and write, and a handshake
//! runner that gates the public API until the application-defined exchange
//! succeeds. Callers only ever see whole messages; `write` and `read` never
//! block.

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod hooks;
mod pump;
mod state;

pub use config::ConnectionConfig;
pub use connection::{Connection, ConnectionBuilder, Handshake, RawChannel};
pub use error::{ConnError, Result};
pub use handshake::{exchange_hello, version_exchange, HandshakeConfig, Hello};
pub use hooks::{PostRead, PreWrite};
pub use state::CloseReason;
