//! Connected-socket wrapper and readiness backends for stockings.
//!
//! This is the lowest layer of stockings. It knows nothing about framing:
//! - [`Stream`] wraps an already-connected TCP or Unix-domain stream socket
//! - [`Readiness`] is the interface the pump waits on, with an event-driven
//!   `poll(2)` backend and a timed `select(2)` fallback
//! - [`Waker`] lets another thread interrupt the event-driven backend
//!
//! Socket creation, connection and accept logic stay with the caller.

pub mod error;
#[cfg(unix)]
pub mod event;
#[cfg(unix)]
pub mod readiness;
#[cfg(unix)]
pub mod stream;
#[cfg(unix)]
pub mod timed;
#[cfg(unix)]
pub mod waker;

pub use error::{Result, TransportError};
#[cfg(unix)]
pub use event::EventReadiness;
#[cfg(unix)]
pub use readiness::{
    default_poll_interval, open_readiness, Interest, Readiness, ReadinessKind, Ready,
    DEFAULT_POLL_INTERVAL, POLL_INTERVAL_ENV, READINESS_ENV,
};
#[cfg(unix)]
pub use stream::Stream;
#[cfg(unix)]
pub use timed::TimedReadiness;
#[cfg(unix)]
pub use waker::Waker;
