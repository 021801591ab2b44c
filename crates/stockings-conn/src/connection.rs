use std::fmt;
use std::os::fd::{AsRawFd, RawFd};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use stockings_frame::Framer;
use stockings_transport::{open_readiness, ReadinessKind, Stream, Waker};
use tracing::{debug, info, warn};

use crate::config::ConnectionConfig;
use crate::error::{ConnError, Result};
use crate::hooks::Hooks;
use crate::pump::Pump;
use crate::state::{CloseReason, Inbound, Shared};

/// Application-defined exchange run once before the connection is usable.
///
/// `Ok(true)` marks the connection ready. `Ok(false)` or an error tears it
/// down. Long-running handshakes should watch [`RawChannel::is_active`].
pub type Handshake = Box<dyn FnOnce(&RawChannel) -> Result<bool> + Send + 'static>;

/// Builds a [`Connection`] around an already-connected socket.
pub struct ConnectionBuilder<W = Bytes, R = Bytes> {
    stream: Stream,
    config: ConnectionConfig,
    handshake: Handshake,
    hooks: Hooks<W, R>,
}

impl ConnectionBuilder<Bytes, Bytes> {
    /// Start from defaults: identity hooks and a handshake that succeeds at once.
    pub fn new(stream: impl Into<Stream>) -> Self {
        Self {
            stream: stream.into(),
            config: ConnectionConfig::default(),
            handshake: Box::new(|_: &RawChannel| -> Result<bool> { Ok(true) }),
            hooks: Hooks::identity(),
        }
    }
}

impl<W, R> ConnectionBuilder<W, R> {
    pub fn config(mut self, config: ConnectionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn max_msg_len(mut self, max_msg_len: usize) -> Self {
        self.config.max_msg_len = max_msg_len;
        self
    }

    pub fn readiness(mut self, kind: ReadinessKind) -> Self {
        self.config.readiness = Some(kind);
        self
    }

    /// Wake interval of the timed readiness backend.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = Some(interval);
        self
    }

    pub fn handshake<F>(mut self, handshake: F) -> Self
    where
        F: FnOnce(&RawChannel) -> Result<bool> + Send + 'static,
    {
        self.handshake = Box::new(handshake);
        self
    }

    /// Replace the pre-write hook, changing what [`Connection::write`] accepts.
    pub fn pre_write<W2, F>(self, hook: F) -> ConnectionBuilder<W2, R>
    where
        F: Fn(W2) -> Result<Bytes> + Send + Sync + 'static,
    {
        ConnectionBuilder {
            stream: self.stream,
            config: self.config,
            handshake: self.handshake,
            hooks: Hooks {
                pre_write: Box::new(hook),
                post_read: self.hooks.post_read,
            },
        }
    }

    /// Replace the post-read hook, changing what [`Connection::read`] returns.
    pub fn post_read<R2, F>(self, hook: F) -> ConnectionBuilder<W, R2>
    where
        F: Fn(Bytes) -> Result<R2> + Send + Sync + 'static,
    {
        ConnectionBuilder {
            stream: self.stream,
            config: self.config,
            handshake: self.handshake,
            hooks: Hooks {
                pre_write: self.hooks.pre_write,
                post_read: Box::new(hook),
            },
        }
    }

    /// Switch the socket to non-blocking mode and start the pump and
    /// handshake threads.
    pub fn spawn(self) -> Result<Connection<W, R>> {
        let framer = Framer::new(self.config.max_msg_len)?;
        let kind = self.config.resolved_readiness();
        let interval = self.config.resolved_poll_interval();

        self.stream.ensure_connected()?;
        self.stream.set_nonblocking(true)?;

        let waker = Arc::new(Waker::new()?);
        let readiness = open_readiness(kind, self.stream.as_raw_fd(), Arc::clone(&waker), interval)?;
        let peer = self.stream.peer_label();
        let shared = Arc::new(Shared::new(waker, Waker::new()?, peer.clone()));

        let pump = Pump::new(self.stream, readiness, framer, Arc::clone(&shared));
        let pump_handle = thread::Builder::new()
            .name("stockings-pump".to_string())
            .spawn(move || pump.run())?;

        let channel = RawChannel {
            shared: Arc::clone(&shared),
            framer,
        };
        let handshake = self.handshake;
        let handshake_handle = match thread::Builder::new()
            .name("stockings-handshake".to_string())
            .spawn(move || run_handshake(handshake, channel))
        {
            Ok(handle) => handle,
            Err(err) => {
                shared.deactivate(CloseReason::Local);
                join_background(pump_handle, &peer);
                return Err(err.into());
            }
        };

        info!(
            peer = %peer,
            readiness = %kind,
            header_bytes = framer.header_width().bytes(),
            max_msg_len = framer.max_msg_len(),
            "connection started"
        );

        Ok(Connection {
            shared,
            framer,
            hooks: self.hooks,
            threads: Mutex::new(vec![pump_handle, handshake_handle]),
        })
    }
}

fn run_handshake(handshake: Handshake, channel: RawChannel) {
    let shared = Arc::clone(&channel.shared);
    let outcome = catch_unwind(AssertUnwindSafe(|| handshake(&channel)));

    let failure = match outcome {
        Ok(Ok(true)) => {
            if shared.mark_ready() {
                debug!(peer = %shared.peer(), "handshake complete");
            } else {
                debug!(peer = %shared.peer(), "connection closed before handshake completed");
            }
            return;
        }
        Ok(Ok(false)) => "handshake rejected by application".to_string(),
        Ok(Err(err)) => err.to_string(),
        Err(_) => "handshake panicked".to_string(),
    };

    if shared.deactivate(CloseReason::HandshakeFailed(failure.clone())) {
        warn!(peer = %shared.peer(), reason = %failure, "handshake failed");
    }
}

/// Join a pump or handshake thread. Returns false, after logging, if it panicked.
fn join_background(handle: JoinHandle<()>, peer: &str) -> bool {
    let name = handle.thread().name().unwrap_or("stockings").to_string();
    if handle.join().is_err() {
        warn!(peer = %peer, thread = %name, "background thread panicked");
        return false;
    }
    true
}

fn send_payload(shared: &Shared, framer: &Framer, payload: &[u8]) -> Result<()> {
    let framed = framer.encode_to_bytes(payload)?;
    shared.enqueue(&framed)
}

/// A message-oriented connection over one stream socket.
///
/// `write` and `read` never block: `write` queues a frame for the pump and
/// `read` returns the oldest decoded message, or `None` if no complete
/// message has arrived yet. Both fail with [`ConnError::NotReady`] until the
/// handshake succeeds. Once the connection is inactive it stays inactive.
pub struct Connection<W = Bytes, R = Bytes> {
    shared: Arc<Shared>,
    framer: Framer,
    hooks: Hooks<W, R>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection<Bytes, Bytes> {
    /// Wrap a connected socket with default settings.
    pub fn new(stream: impl Into<Stream>) -> Result<Self> {
        ConnectionBuilder::new(stream).spawn()
    }

    pub fn builder(stream: impl Into<Stream>) -> ConnectionBuilder<Bytes, Bytes> {
        ConnectionBuilder::new(stream)
    }
}

impl<W, R> Connection<W, R> {
    /// Apply the pre-write hook, frame the payload and queue it.
    ///
    /// An oversized payload is rejected with [`ConnError::MessageTooLarge`]
    /// and nothing is queued.
    pub fn write(&self, message: W) -> Result<()> {
        self.ensure_ready()?;
        let payload = (self.hooks.pre_write)(message)?;
        send_payload(&self.shared, &self.framer, &payload)
    }

    /// Pop the oldest undelivered message, if any, through the post-read hook.
    ///
    /// After the connection goes inactive, messages decoded before that
    /// point are still handed out; then `read` keeps returning `None`.
    pub fn read(&self) -> Result<Option<R>> {
        self.ensure_ready()?;
        match self.shared.take() {
            Inbound::Message(payload) => (self.hooks.post_read)(payload).map(Some),
            Inbound::Empty | Inbound::Closed => Ok(None),
        }
    }

    /// Like [`Connection::read`], but waits up to `timeout` for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<R>> {
        self.ensure_ready()?;
        match self.shared.take_timeout(timeout) {
            Inbound::Message(payload) => (self.hooks.post_read)(payload).map(Some),
            Inbound::Empty | Inbound::Closed => Ok(None),
        }
    }

    /// Block until the handshake resolves.
    pub fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let state = self
            .shared
            .wait_until(timeout, |state| state.ready || !state.active);
        if state.ready {
            return Ok(());
        }
        if state.active {
            return Err(ConnError::Timeout(timeout));
        }
        match &state.close_reason {
            Some(CloseReason::HandshakeFailed(reason)) => {
                Err(ConnError::HandshakeFailed(reason.clone()))
            }
            _ => Err(ConnError::NotReady),
        }
    }

    /// Block until every queued byte has been handed to the socket.
    pub fn flush(&self, timeout: Duration) -> Result<()> {
        let state = self
            .shared
            .wait_until(timeout, |state| state.send.is_empty() || !state.active);
        if state.send.is_empty() {
            Ok(())
        } else if !state.active {
            Err(ConnError::Closed)
        } else {
            Err(ConnError::Timeout(timeout))
        }
    }

    /// Deactivate, release the socket and join both background threads.
    ///
    /// Queued but unsent bytes are dropped; call [`Connection::flush`] first
    /// to avoid that.
    pub fn close(&self) {
        if self.shared.deactivate(CloseReason::Local) {
            info!(peer = %self.shared.peer(), "closing connection");
        }

        let handles = std::mem::take(
            &mut *self
                .threads
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            join_background(handle, self.shared.peer());
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn is_ready(&self) -> bool {
        self.shared.lock().ready
    }

    /// Outbound bytes the socket has not yet accepted.
    pub fn pending_bytes(&self) -> usize {
        self.shared.lock().send.pending()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.lock().close_reason.clone()
    }

    pub fn peer(&self) -> &str {
        self.shared.peer()
    }

    pub fn max_msg_len(&self) -> usize {
        self.framer.max_msg_len()
    }

    pub fn framer(&self) -> &Framer {
        &self.framer
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.shared.lock().ready {
            Ok(())
        } else {
            Err(ConnError::NotReady)
        }
    }
}

/// A descriptor that polls readable while [`Connection::read`] has a message
/// to hand out, or once the connection has gone inactive.
///
/// The caller must not read from or close it; [`Connection::read`] clears it
/// when the last waiting message is taken.
impl<W, R> AsRawFd for Connection<W, R> {
    fn as_raw_fd(&self) -> RawFd {
        self.shared.inbound_fd()
    }
}

impl<W, R> Drop for Connection<W, R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<W, R> fmt::Debug for Connection<W, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("Connection")
            .field("peer", &self.shared.peer())
            .field("active", &state.active)
            .field("ready", &state.ready)
            .field("header_bytes", &self.framer.header_width().bytes())
            .finish()
    }
}

/// Hook-free access to the connection for handshakes.
///
/// Frames are written and read exactly like [`Connection::write`] and
/// [`Connection::read`], but without the pre/post hooks and without the
/// readiness gate.
pub struct RawChannel {
    shared: Arc<Shared>,
    framer: Framer,
}

impl RawChannel {
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        send_payload(&self.shared, &self.framer, payload)
    }

    /// Returns `Ok(None)` if nothing has arrived yet and
    /// [`ConnError::Closed`] once the connection is inactive and drained.
    pub fn read(&self) -> Result<Option<Bytes>> {
        match self.shared.take() {
            Inbound::Message(payload) => Ok(Some(payload)),
            Inbound::Empty => Ok(None),
            Inbound::Closed => Err(ConnError::Closed),
        }
    }

    /// Like [`RawChannel::read`], waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        match self.shared.take_timeout(timeout) {
            Inbound::Message(payload) => Ok(Some(payload)),
            Inbound::Empty => Ok(None),
            Inbound::Closed => Err(ConnError::Closed),
        }
    }

    pub fn is_active(&self) -> bool {
        self.shared.lock().active
    }

    pub fn max_msg_len(&self) -> usize {
        self.framer.max_msg_len()
    }

    pub fn peer(&self) -> &str {
        self.shared.peer()
    }
}

impl fmt::Debug for RawChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawChannel")
            .field("peer", &self.shared.peer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::sync::mpsc;
    use std::time::Instant;

    use stockings_transport::{Interest, Readiness, TimedReadiness};

    use super::*;
    use crate::hooks::{utf8_post_read, utf8_pre_write};

    const WAIT: Duration = Duration::from_secs(5);

    fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    #[test]
    fn partial_frame_is_not_delivered() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .post_read(utf8_post_read)
            .spawn()
            .unwrap();
        conn.wait_ready(WAIT).unwrap();

        let wire = b"\x00\x0cTest Message";
        remote.write_all(&wire[..5]).unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(conn.read().unwrap(), None);

        remote.write_all(&wire[5..]).unwrap();
        assert!(wait_for(|| conn.pending_messages_for_test() > 0));
        assert_eq!(conn.read().unwrap().as_deref(), Some("Test Message"));
        assert_eq!(conn.read().unwrap(), None);
    }

    #[test]
    fn write_produces_length_prefixed_bytes() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .pre_write(utf8_pre_write)
            .spawn()
            .unwrap();
        conn.wait_ready(WAIT).unwrap();

        conn.write("Test Message".to_string()).unwrap();

        let mut wire = [0u8; 14];
        remote.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, b"\x00\x0cTest Message");
    }

    #[test]
    fn oversize_write_leaves_queue_unchanged() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local).max_msg_len(256).spawn().unwrap();
        conn.wait_ready(WAIT).unwrap();

        let before = conn.pending_bytes();
        let err = conn.write(Bytes::from(vec![0u8; 300])).unwrap_err();

        assert!(matches!(err, ConnError::MessageTooLarge { size: 300, max: 255 }));
        assert_eq!(conn.pending_bytes(), before);
        assert!(conn.is_active());
    }

    #[test]
    fn gated_until_handshake_returns() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let conn = ConnectionBuilder::new(local)
            .handshake(move |_channel: &RawChannel| {
                release_rx.recv().ok();
                Ok(true)
            })
            .spawn()
            .unwrap();

        assert!(matches!(conn.read(), Err(ConnError::NotReady)));
        assert!(matches!(
            conn.write(Bytes::from_static(b"early")),
            Err(ConnError::NotReady)
        ));
        assert!(!conn.is_ready());

        release_tx.send(()).unwrap();
        conn.wait_ready(WAIT).unwrap();

        assert!(conn.read().unwrap().is_none());
        conn.write(Bytes::from_static(b"late")).unwrap();
    }

    #[test]
    fn failed_handshake_never_becomes_ready() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .handshake(|_channel: &RawChannel| Ok(false))
            .spawn()
            .unwrap();

        assert!(matches!(
            conn.wait_ready(WAIT),
            Err(ConnError::HandshakeFailed(_))
        ));
        assert!(!conn.is_active());
        assert!(matches!(conn.read(), Err(ConnError::NotReady)));
        assert!(matches!(
            conn.write(Bytes::from_static(b"x")),
            Err(ConnError::NotReady)
        ));
        assert!(matches!(
            conn.close_reason(),
            Some(CloseReason::HandshakeFailed(_))
        ));
    }

    #[test]
    fn erroring_handshake_tears_down() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .handshake(|_channel: &RawChannel| Err(ConnError::HandshakeFailed("nope".to_string())))
            .spawn()
            .unwrap();

        assert!(wait_for(|| !conn.is_active()));
        assert!(!conn.is_ready());
    }

    #[test]
    fn panicking_handshake_tears_down() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .handshake(|_channel: &RawChannel| -> Result<bool> { panic!("boom") })
            .spawn()
            .unwrap();

        assert!(wait_for(|| !conn.is_active()));
        assert!(matches!(
            conn.close_reason(),
            Some(CloseReason::HandshakeFailed(reason)) if reason.contains("panicked")
        ));
    }

    #[test]
    fn close_mid_handshake_never_ready() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .handshake(|channel: &RawChannel| {
                while channel.is_active() {
                    thread::sleep(Duration::from_millis(1));
                }
                Ok(true)
            })
            .spawn()
            .unwrap();

        conn.close();
        assert!(!conn.is_ready());
        assert_eq!(conn.close_reason(), Some(CloseReason::Local));
    }

    #[test]
    fn raw_channel_bypasses_hooks() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let conn = ConnectionBuilder::new(local)
            .pre_write(|_: String| -> Result<Bytes> { Ok(Bytes::from_static(b"hooked")) })
            .handshake(|channel: &RawChannel| {
                channel.write(b"raw")?;
                Ok(true)
            })
            .spawn()
            .unwrap();
        conn.wait_ready(WAIT).unwrap();

        let mut wire = [0u8; 5];
        remote.read_exact(&mut wire).unwrap();
        assert_eq!(&wire, b"\x00\x03raw");
    }

    #[test]
    fn close_is_observed_by_peer() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let conn = Connection::new(local).unwrap();
        conn.wait_ready(WAIT).unwrap();

        conn.close();
        assert!(!conn.is_active());
        assert!(matches!(
            conn.write(Bytes::from_static(b"x")),
            Err(ConnError::Closed)
        ));

        let mut buf = [0u8; 1];
        assert_eq!(remote.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn join_background_reports_panics() {
        let clean = thread::Builder::new()
            .name("stockings-pump".to_string())
            .spawn(|| {})
            .unwrap();
        assert!(join_background(clean, "test"));

        let panicked = thread::Builder::new()
            .name("stockings-pump".to_string())
            .spawn(|| panic!("pump blew up"))
            .unwrap();
        assert!(!join_background(panicked, "test"));
    }

    #[test]
    fn close_twice_is_harmless() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = Connection::new(local).unwrap();
        conn.close();
        conn.close();
        assert_eq!(conn.close_reason(), Some(CloseReason::Local));
    }

    #[test]
    fn zero_max_len_is_rejected_at_spawn() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let result = ConnectionBuilder::new(local).max_msg_len(0).spawn();
        assert!(matches!(result, Err(ConnError::Frame(_))));
    }

    #[test]
    fn debug_shows_peer_and_flags() {
        let (local, _remote) = UnixStream::pair().unwrap();
        let conn = Connection::new(local).unwrap();
        conn.wait_ready(WAIT).unwrap();

        let debug = format!("{conn:?}");
        assert!(debug.contains("unix:unnamed"));
        assert!(debug.contains("ready: true"));
    }

    fn signalled(fd: RawFd) -> bool {
        let mut readiness = TimedReadiness::new(fd, Duration::from_millis(20)).unwrap();
        readiness.register_interest(Interest::READABLE);
        readiness.wait().unwrap().readable
    }

    #[test]
    fn inbound_descriptor_tracks_waiting_messages() {
        let (local, mut remote) = UnixStream::pair().unwrap();
        let conn = Connection::new(local).unwrap();
        conn.wait_ready(WAIT).unwrap();
        let fd = conn.as_raw_fd();
        assert!(!signalled(fd));

        remote.write_all(b"\x00\x01a\x00\x01b").unwrap();
        assert!(wait_for(|| signalled(fd)));

        assert_eq!(conn.read().unwrap().as_deref(), Some(&b"a"[..]));
        assert!(wait_for(|| conn.pending_messages_for_test() == 1));
        assert!(signalled(fd));
        assert_eq!(conn.read().unwrap().as_deref(), Some(&b"b"[..]));
        assert!(!signalled(fd));

        drop(remote);
        assert!(wait_for(|| !conn.is_active()));
        assert!(signalled(fd));
    }

    impl<W, R> Connection<W, R> {
        fn pending_messages_for_test(&self) -> usize {
            self.shared.lock().inbox.len()
        }
    }
}
