mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "stockings", version, about = "Length-prefixed TCP messaging CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        env = "STOCKINGS_LOG_LEVEL",
        default_value = "info",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "stockings",
            "send",
            "127.0.0.1:4000",
            "--data",
            "hello",
            "--max-msg-len",
            "256",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => assert_eq!(args.conn.max_msg_len, 256),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from([
            "stockings",
            "send",
            "127.0.0.1:4000",
            "--json",
            "{\"x\":1}",
            "--data",
            "hello",
        ])
        .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_readiness_and_handshake_flags() {
        let cli = Cli::try_parse_from([
            "stockings",
            "echo",
            "127.0.0.1:0",
            "--readiness",
            "timed",
            "--poll-interval",
            "50ms",
            "--handshake",
        ])
        .expect("echo args should parse");

        match cli.command {
            Command::Echo(args) => {
                assert_eq!(
                    args.conn.readiness,
                    Some(stockings_transport::ReadinessKind::Timed)
                );
                assert!(args.conn.handshake);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_readiness() {
        let result = Cli::try_parse_from([
            "stockings",
            "listen",
            "127.0.0.1:0",
            "--readiness",
            "magic",
        ]);
        assert!(result.is_err());
    }
}
