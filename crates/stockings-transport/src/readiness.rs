use std::os::fd::RawFd;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{Result, TransportError};
use crate::event::EventReadiness;
use crate::timed::TimedReadiness;
use crate::waker::Waker;

/// Environment variable that forces a readiness backend (`event` or `timed`).
pub const READINESS_ENV: &str = "STOCKINGS_READINESS";

/// Environment variable overriding the fallback wake interval, in milliseconds.
pub const POLL_INTERVAL_ENV: &str = "STOCKINGS_POLL_INTERVAL_MS";

/// Default wake interval of the timed backend.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

static DETECTED_KIND: OnceLock<ReadinessKind> = OnceLock::new();
static POLL_INTERVAL: OnceLock<Duration> = OnceLock::new();

/// What the pump wants to hear about on its next wait.
///
/// Readable interest is permanent; only writability is toggled, and only
/// while outbound bytes are pending.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interest {
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Interest = Interest { writable: false };
    pub const READ_WRITE: Interest = Interest { writable: true };

    pub fn new(writable: bool) -> Self {
        Self { writable }
    }
}

/// Outcome of a single readiness wait.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Ready {
    /// The socket has bytes, an orderly EOF, or a pending error to report.
    pub readable: bool,
    /// The socket accepts more outbound bytes.
    pub writable: bool,
    /// Another thread poked the waker.
    pub woken: bool,
    /// The wake interval elapsed with no socket activity.
    pub timed_out: bool,
}

impl Ready {
    pub fn is_empty(&self) -> bool {
        !(self.readable || self.writable || self.woken || self.timed_out)
    }
}

/// A readiness notification strategy.
///
/// Implementations must never report readability late enough to lose bytes,
/// and must block (or sleep) between reports rather than spin.
pub trait Readiness: Send {
    /// Replace the interest set used by the next [`Readiness::wait`].
    fn register_interest(&mut self, interest: Interest);

    /// Block until the socket changes state, the backend is woken, or its
    /// interval elapses. An interrupted wait returns an empty [`Ready`].
    fn wait(&mut self) -> std::io::Result<Ready>;

    /// Which strategy this is.
    fn kind(&self) -> ReadinessKind;
}

/// The two interchangeable readiness strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReadinessKind {
    /// Block in `poll(2)` until the OS reports a state change.
    Event,
    /// Wake on a fixed interval via `select(2)`.
    Timed,
}

impl ReadinessKind {
    /// The process-wide backend, probed once and cached.
    pub fn detect() -> Self {
        *DETECTED_KIND.get_or_init(probe_kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReadinessKind::Event => "event",
            ReadinessKind::Timed => "timed",
        }
    }
}

impl FromStr for ReadinessKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" | "poll" => Ok(ReadinessKind::Event),
            "timed" | "select" => Ok(ReadinessKind::Timed),
            other => Err(TransportError::UnknownReadiness(other.to_string())),
        }
    }
}

impl std::fmt::Display for ReadinessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn probe_kind() -> ReadinessKind {
    if let Ok(raw) = std::env::var(READINESS_ENV) {
        match raw.parse::<ReadinessKind>() {
            Ok(kind) => {
                debug!(%kind, "readiness backend forced by environment");
                return kind;
            }
            Err(err) => warn!(error = %err, "ignoring STOCKINGS_READINESS"),
        }
    }

    let kind = if native_poll_available() {
        ReadinessKind::Event
    } else {
        ReadinessKind::Timed
    };
    debug!(%kind, "readiness backend selected");
    kind
}

fn native_poll_available() -> bool {
    cfg!(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
        target_os = "illumos",
        target_os = "solaris",
    ))
}

/// The process-wide wake interval of the timed backend.
pub fn default_poll_interval() -> Duration {
    *POLL_INTERVAL.get_or_init(|| match std::env::var(POLL_INTERVAL_ENV) {
        Ok(raw) => match parse_poll_interval(&raw) {
            Some(interval) => interval,
            None => {
                warn!(value = %raw, "ignoring invalid STOCKINGS_POLL_INTERVAL_MS");
                DEFAULT_POLL_INTERVAL
            }
        },
        Err(_) => DEFAULT_POLL_INTERVAL,
    })
}

fn parse_poll_interval(raw: &str) -> Option<Duration> {
    raw.trim()
        .parse::<u64>()
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Build the backend of the given kind for one socket.
///
/// The waker is only consulted by the event-driven backend; the timed
/// backend discovers new work at its next interval.
pub fn open_readiness(
    kind: ReadinessKind,
    fd: RawFd,
    waker: Arc<Waker>,
    interval: Duration,
) -> Result<Box<dyn Readiness>> {
    match kind {
        ReadinessKind::Event => Ok(Box::new(EventReadiness::new(fd, waker))),
        ReadinessKind::Timed => Ok(Box::new(TimedReadiness::new(fd, interval)?)),
    }
}
