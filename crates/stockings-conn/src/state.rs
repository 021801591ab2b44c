use std::collections::VecDeque;
use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use stockings_frame::SendQueue;
use stockings_transport::Waker;
use tracing::warn;

use crate::error::{ConnError, Result};

/// Why a connection stopped being active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close()` was called or the handle was dropped.
    Local,
    /// The peer shut the stream down in an orderly way.
    PeerClosed,
    /// The handshake returned failure, errored or panicked.
    HandshakeFailed(String),
    /// A socket or readiness error.
    Io(String),
    /// The peer violated the framing (oversized length header).
    Protocol(String),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::PeerClosed => f.write_str("peer closed the connection"),
            CloseReason::HandshakeFailed(msg) => write!(f, "handshake failed: {msg}"),
            CloseReason::Io(msg) => write!(f, "I/O failure: {msg}"),
            CloseReason::Protocol(msg) => write!(f, "protocol violation: {msg}"),
        }
    }
}

/// Everything the caller, the pump and the handshake runner share.
pub(crate) struct State {
    pub(crate) send: SendQueue,
    pub(crate) inbox: VecDeque<Bytes>,
    pub(crate) active: bool,
    pub(crate) ready: bool,
    pub(crate) close_reason: Option<CloseReason>,
}

pub(crate) enum Inbound {
    Message(Bytes),
    Empty,
    Closed,
}

/// The state block plus its wakeup plumbing.
///
/// The lock is only ever held for buffer manipulation and the pump's single
/// non-blocking write; nobody blocks while holding it.
pub(crate) struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    waker: Arc<Waker>,
    /// Readable while a message is waiting or the connection is inactive.
    inbound: Waker,
    peer: String,
}

impl Shared {
    pub(crate) fn new(waker: Arc<Waker>, inbound: Waker, peer: String) -> Self {
        Self {
            state: Mutex::new(State {
                send: SendQueue::new(),
                inbox: VecDeque::new(),
                active: true,
                ready: false,
                close_reason: None,
            }),
            changed: Condvar::new(),
            waker,
            inbound,
            peer,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn peer(&self) -> &str {
        &self.peer
    }

    pub(crate) fn inbound_fd(&self) -> RawFd {
        self.inbound.as_raw_fd()
    }

    /// Queue framed bytes and nudge the pump.
    pub(crate) fn enqueue(&self, framed: &[u8]) -> Result<()> {
        {
            let mut state = self.lock();
            if !state.active {
                return Err(ConnError::Closed);
            }
            state.send.enqueue(framed);
        }
        self.wake();
        Ok(())
    }

    pub(crate) fn take(&self) -> Inbound {
        let mut state = self.lock();
        self.pop(&mut state)
    }

    /// Like [`Shared::take`], but waits up to `timeout` for a message.
    pub(crate) fn take_timeout(&self, timeout: Duration) -> Inbound {
        let mut state = self.wait_until(timeout, |state| !state.inbox.is_empty() || !state.active);
        self.pop(&mut state)
    }

    fn pop(&self, state: &mut State) -> Inbound {
        let outcome = match state.inbox.pop_front() {
            Some(message) => Inbound::Message(message),
            None if state.active => Inbound::Empty,
            None => Inbound::Closed,
        };
        if state.inbox.is_empty() && state.active {
            if let Err(err) = self.inbound.drain() {
                warn!(peer = %self.peer, error = %err, "failed to clear inbound signal");
            }
        }
        outcome
    }

    pub(crate) fn deliver(&self, messages: Vec<Bytes>) {
        if messages.is_empty() {
            return;
        }
        let mut state = self.lock();
        let was_empty = state.inbox.is_empty();
        state.inbox.extend(messages);
        if was_empty {
            self.signal_inbound();
        }
        self.changed.notify_all();
    }

    /// Mark the connection inactive. Returns false if it already was; the
    /// first recorded reason wins.
    pub(crate) fn deactivate(&self, reason: CloseReason) -> bool {
        {
            let mut state = self.lock();
            if !state.active {
                return false;
            }
            state.active = false;
            state.close_reason = Some(reason);
            self.signal_inbound();
            self.changed.notify_all();
        }
        self.wake();
        true
    }

    /// Flip `ready` on, unless the connection died first.
    pub(crate) fn mark_ready(&self) -> bool {
        let mut state = self.lock();
        if !state.active {
            return false;
        }
        state.ready = true;
        self.changed.notify_all();
        true
    }

    pub(crate) fn notify(&self) {
        self.changed.notify_all();
    }

    pub(crate) fn wait_until<F>(&self, timeout: Duration, mut done: F) -> MutexGuard<'_, State>
    where
        F: FnMut(&State) -> bool,
    {
        let state = self.lock();
        let (state, _) = self
            .changed
            .wait_timeout_while(state, timeout, |state| !done(state))
            .unwrap_or_else(PoisonError::into_inner);
        state
    }

    fn signal_inbound(&self) {
        if let Err(err) = self.inbound.wake() {
            warn!(peer = %self.peer, error = %err, "failed to raise inbound signal");
        }
    }

    fn wake(&self) {
        if let Err(err) = self.waker.wake() {
            warn!(peer = %self.peer, error = %err, "failed to wake pump");
        }
    }
}
