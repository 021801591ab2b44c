use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stockings_conn::Connection;

use crate::cmd::{accept, bind, install_ctrlc_handler, EchoArgs, RECV_POLL};
use crate::exit::{conn_error, CliResult, SUCCESS};

pub fn run(args: EchoArgs) -> CliResult<i32> {
    let listener = bind(&args.addr)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while let Some(stream) = accept(&listener, &running)? {
        let conn = match args.conn.open(stream) {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting client");
                continue;
            }
        };

        echo_until_closed(&conn, &running)?;
        tracing::info!(
            peer = %conn.peer(),
            reason = ?conn.close_reason(),
            "client finished"
        );
    }

    Ok(SUCCESS)
}

fn echo_until_closed(conn: &Connection, running: &AtomicBool) -> CliResult<()> {
    while running.load(Ordering::SeqCst) {
        let message = match conn.recv_timeout(RECV_POLL) {
            Ok(Some(message)) => message,
            Ok(None) if conn.is_active() => continue,
            Ok(None) => break,
            Err(err) => return Err(conn_error("receive failed", err)),
        };

        tracing::info!(peer = %conn.peer(), size = message.len(), "echoing message");

        match conn.write(message) {
            Ok(()) => {}
            Err(stockings_conn::ConnError::Closed) => break,
            Err(err) => return Err(conn_error("echo send failed", err)),
        }
    }
    Ok(())
}
