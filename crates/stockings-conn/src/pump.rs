use std::io::{ErrorKind, Read};
use std::sync::Arc;

use stockings_frame::{Framer, RecvAssembler};
use stockings_transport::{Interest, Readiness, Stream};
use tracing::{debug, info, warn};

use crate::state::{CloseReason, Shared};

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// The background loop that owns the socket.
///
/// Each iteration registers interest (always readable, writable while bytes
/// are queued), waits, then reads into the assembler and/or drains the send
/// queue. The loop ends when the shared `active` flag drops or on the first
/// transport failure; the socket is shut down and closed on the way out.
pub(crate) struct Pump {
    stream: Stream,
    readiness: Box<dyn Readiness>,
    assembler: RecvAssembler,
    shared: Arc<Shared>,
    read_buf: Vec<u8>,
}

impl Pump {
    pub(crate) fn new(
        stream: Stream,
        readiness: Box<dyn Readiness>,
        framer: Framer,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            stream,
            readiness,
            assembler: RecvAssembler::new(framer),
            shared,
            read_buf: vec![0u8; READ_CHUNK_SIZE],
        }
    }

    pub(crate) fn run(mut self) {
        debug!(
            peer = %self.shared.peer(),
            readiness = %self.readiness.kind(),
            "pump running"
        );

        match self.run_loop() {
            None => debug!(peer = %self.shared.peer(), "pump stopping on request"),
            Some(reason) => {
                match &reason {
                    CloseReason::Io(_) | CloseReason::Protocol(_) => {
                        warn!(peer = %self.shared.peer(), %reason, "connection failed")
                    }
                    _ => info!(peer = %self.shared.peer(), %reason, "connection ended"),
                }
                self.shared.deactivate(reason);
            }
        }

        if let Err(err) = self.stream.shutdown() {
            debug!(peer = %self.shared.peer(), error = %err, "socket shutdown failed");
        }
    }

    /// Returns `None` when stopped through the shared flag, or the reason
    /// the pump itself gave up.
    fn run_loop(&mut self) -> Option<CloseReason> {
        loop {
            let pending = {
                let state = self.shared.lock();
                if !state.active {
                    return None;
                }
                !state.send.is_empty()
            };

            self.readiness.register_interest(Interest::new(pending));
            let ready = match self.readiness.wait() {
                Ok(ready) => ready,
                Err(err) => return Some(CloseReason::Io(format!("readiness wait failed: {err}"))),
            };

            if ready.readable {
                if let Err(reason) = self.receive() {
                    return Some(reason);
                }
            }

            // The timed backend has no waker, so every interval doubles as a
            // chance to push bytes queued while it slept.
            if ready.writable || ready.timed_out {
                if let Err(reason) = self.send() {
                    return Some(reason);
                }
            }
        }
    }

    fn receive(&mut self) -> Result<(), CloseReason> {
        let read = match self.stream.read(&mut self.read_buf) {
            Ok(0) => {
                let lost = self.assembler.discard();
                if lost > 0 {
                    debug!(
                        peer = %self.shared.peer(),
                        bytes = lost,
                        "discarding partial frame at end of stream"
                    );
                }
                return Err(CloseReason::PeerClosed);
            }
            Ok(n) => n,
            Err(err)
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::Interrupted =>
            {
                return Ok(());
            }
            Err(err) => return Err(CloseReason::Io(format!("receive failed: {err}"))),
        };

        let mut messages = Vec::new();
        let absorbed = self.assembler.absorb(&self.read_buf[..read], &mut messages);
        if !messages.is_empty() {
            self.shared.deliver(messages);
        }
        absorbed.map_err(|err| CloseReason::Protocol(err.to_string()))
    }

    fn send(&mut self) -> Result<(), CloseReason> {
        let mut state = self.shared.lock();
        if state.send.is_empty() {
            return Ok(());
        }

        state
            .send
            .drain_nonblocking(&mut self.stream)
            .map_err(|err| CloseReason::Io(format!("send failed: {err}")))?;
        if state.send.is_empty() {
            self.shared.notify();
        }
        Ok(())
    }
}
