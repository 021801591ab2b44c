use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::cmd::{accept, bind, install_ctrlc_handler, ListenArgs, RECV_POLL};
use crate::exit::{conn_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

pub fn run(args: ListenArgs, format: OutputFormat) -> CliResult<i32> {
    let listener = bind(&args.addr)?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    let mut printed = 0usize;

    while let Some(stream) = accept(&listener, &running)? {
        let conn = match args.conn.open(stream) {
            Ok(conn) => conn,
            Err(err) => {
                tracing::warn!(error = %err, "rejecting client");
                continue;
            }
        };

        while running.load(Ordering::SeqCst) {
            let message = match conn.recv_timeout(RECV_POLL) {
                Ok(Some(message)) => message,
                Ok(None) if conn.is_active() => continue,
                Ok(None) => break,
                Err(err) => return Err(conn_error("receive failed", err)),
            };

            print_message(message.as_ref(), conn.peer(), format);
            printed = printed.saturating_add(1);

            if let Some(count) = args.count {
                if printed >= count {
                    return Ok(SUCCESS);
                }
            }
        }
    }

    Ok(SUCCESS)
}
