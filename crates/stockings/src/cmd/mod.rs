use std::io;
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{Args, Subcommand};
use stockings_conn::{version_exchange, Connection, ConnectionBuilder, HandshakeConfig};
use stockings_frame::DEFAULT_MAX_MSG_LEN;
use stockings_transport::ReadinessKind;

use crate::exit::{conn_error, io_error, CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod echo;
pub mod listen;
pub mod send;
pub mod version;

const ACCEPT_POLL: Duration = Duration::from_millis(50);
pub(crate) const RECV_POLL: Duration = Duration::from_millis(100);

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Accept connections and echo every message back.
    Echo(EchoArgs),
    /// Send a single message.
    Send(SendArgs),
    /// Accept connections and print received messages.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Echo(args) => echo::run(args),
        Command::Send(args) => send::run(args, format),
        Command::Listen(args) => listen::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

/// Connection settings shared by every networked subcommand.
#[derive(Args, Debug, Clone)]
pub struct ConnectionArgs {
    /// Maximum message length; both ends must agree.
    #[arg(long, env = "STOCKINGS_MAX_MSG_LEN", default_value_t = DEFAULT_MAX_MSG_LEN)]
    pub max_msg_len: usize,
    /// Readiness backend: event or timed. Default: auto-detect.
    #[arg(long, value_name = "KIND")]
    pub readiness: Option<ReadinessKind>,
    /// Wake interval for the timed backend (e.g. 500ms, 1s).
    #[arg(long, value_name = "DURATION")]
    pub poll_interval: Option<String>,
    /// Run the version-exchange handshake before exchanging messages.
    #[arg(long)]
    pub handshake: bool,
    /// Time allowed for the handshake (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub handshake_timeout: String,
}

impl ConnectionArgs {
    /// Wrap `stream` and wait for the handshake to resolve.
    pub fn open(&self, stream: TcpStream) -> CliResult<Connection> {
        let handshake_timeout = parse_duration(&self.handshake_timeout)?;
        let mut builder = ConnectionBuilder::new(stream).max_msg_len(self.max_msg_len);
        if let Some(kind) = self.readiness {
            builder = builder.readiness(kind);
        }
        if let Some(interval) = &self.poll_interval {
            builder = builder.poll_interval(parse_duration(interval)?);
        }
        if self.handshake {
            builder = builder.handshake(version_exchange(HandshakeConfig {
                timeout: handshake_timeout,
                ..HandshakeConfig::default()
            }));
        }

        let conn = builder
            .spawn()
            .map_err(|err| conn_error("connection setup failed", err))?;
        conn.wait_ready(handshake_timeout + Duration::from_secs(1))
            .map_err(|err| conn_error("handshake failed", err))?;
        Ok(conn)
    }
}

#[derive(Args, Debug)]
pub struct EchoArgs {
    /// Address to bind (e.g. 127.0.0.1:4000).
    pub addr: String,
    #[command(flatten)]
    pub conn: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Address to connect to.
    pub addr: String,
    /// JSON payload.
    #[arg(long, conflicts_with_all = ["data", "file"])]
    pub json: Option<String>,
    /// Raw string payload.
    #[arg(long, conflicts_with_all = ["json", "file"])]
    pub data: Option<String>,
    /// Read payload from file.
    #[arg(long, conflicts_with_all = ["json", "data"])]
    pub file: Option<PathBuf>,
    /// Wait for one response message and print it.
    #[arg(long)]
    pub wait: bool,
    /// Maximum time to wait for the response when --wait is set (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub wait_timeout: String,
    #[command(flatten)]
    pub conn: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Address to bind.
    pub addr: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub conn: ConnectionArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub(crate) fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub(crate) fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub(crate) fn bind(addr: &str) -> CliResult<TcpListener> {
    let listener =
        TcpListener::bind(addr).map_err(|err| io_error(&format!("bind {addr} failed"), err))?;
    listener
        .set_nonblocking(true)
        .map_err(|err| io_error("listener setup failed", err))?;
    if let Ok(local) = listener.local_addr() {
        tracing::info!(addr = %local, "listening");
    }
    Ok(listener)
}

/// Wait for the next client, or `None` once `running` is cleared.
pub(crate) fn accept(listener: &TcpListener, running: &AtomicBool) -> CliResult<Option<TcpStream>> {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                tracing::debug!(peer = %addr, "accepted");
                return Ok(Some(stream));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(io_error("accept failed", err)),
        }
    }
    Ok(None)
}
