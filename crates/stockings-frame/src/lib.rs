//! Length-prefixed message framing for stream sockets.
//!
//! Every message is framed as:
//! - An `H`-byte big-endian unsigned payload length
//! - The payload itself
//!
//! `H` is derived from the configured maximum message length and is not
//! negotiated on the wire. Nothing here performs blocking I/O: the
//! [`SendQueue`] writes whatever the socket accepts and keeps the rest, and the
//! [`RecvAssembler`] turns arbitrary read chunks back into whole messages.

pub mod assembler;
pub mod codec;
pub mod error;
pub mod send_queue;

pub use assembler::RecvAssembler;
pub use codec::{Framer, HeaderWidth, DEFAULT_MAX_MSG_LEN, MAX_HEADER_WIDTH};
pub use error::{FrameError, Result};
pub use send_queue::SendQueue;
