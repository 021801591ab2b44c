use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::codec::Framer;
use crate::error::Result;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Reassembles complete messages from raw socket reads.
///
/// A single read may carry several frames, part of one, or both; the
/// assembler buffers the tail until the rest arrives.
#[derive(Debug)]
pub struct RecvAssembler {
    framer: Framer,
    buf: BytesMut,
}

impl RecvAssembler {
    pub fn new(framer: Framer) -> Self {
        Self {
            framer,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Append freshly read bytes and push every message they complete onto
    /// `out`, in wire order.
    ///
    /// An error means the peer announced a frame larger than allowed; the
    /// stream can no longer be trusted and the caller should drop it. Messages
    /// that completed ahead of the bad header are still in `out`.
    pub fn absorb(&mut self, data: &[u8], out: &mut Vec<Bytes>) -> Result<()> {
        self.buf.extend_from_slice(data);

        let before = out.len();
        let result = loop {
            match self.framer.try_decode(&mut self.buf) {
                Ok(Some(message)) => out.push(message),
                Ok(None) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        if out.len() > before {
            trace!(
                messages = out.len() - before,
                buffered = self.buf.len(),
                "decoded frames"
            );
        }
        result
    }

    /// Bytes of an incomplete frame held back for the next read.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop a trailing partial frame, returning how many bytes were lost.
    pub fn discard(&mut self) -> usize {
        let lost = self.buf.len();
        self.buf.clear();
        lost
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }
}
