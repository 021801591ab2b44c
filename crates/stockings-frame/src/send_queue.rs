use std::io::{ErrorKind, Write};

use bytes::{Buf, BytesMut};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Outbound bytes waiting for the socket.
///
/// Holds already-framed bytes in enqueue order. The queue itself is not
/// synchronised; the connection keeps it behind its state lock so the
/// caller's `write` and the pump's drain never interleave.
#[derive(Debug)]
pub struct SendQueue {
    buf: BytesMut,
}

impl SendQueue {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append an already-framed byte sequence.
    pub fn enqueue(&mut self, framed: &[u8]) {
        self.buf.extend_from_slice(framed);
    }

    /// Bytes not yet accepted by the socket.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Make one non-blocking write of as much as the socket accepts.
    ///
    /// Returns the number of bytes written; the unwritten remainder stays
    /// queued. `WouldBlock`, `Interrupted` and a zero-byte write all count as
    /// "nothing written yet" rather than failure. Any other error is returned
    /// and the queue is left as it was.
    pub fn drain_nonblocking<W: Write>(&mut self, sink: &mut W) -> std::io::Result<usize> {
        if self.buf.is_empty() {
            return Ok(0);
        }

        match sink.write(&self.buf) {
            Ok(n) => {
                self.buf.advance(n);
                Ok(n)
            }
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                Ok(0)
            }
            Err(err) => Err(err),
        }
    }
}

impl Default for SendQueue {
    fn default() -> Self {
        Self::new()
    }
}
