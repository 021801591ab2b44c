use std::fs;
use std::net::TcpStream;

use bytes::Bytes;
use stockings_conn::Connection;

use crate::cmd::{parse_duration, SendArgs};
use crate::exit::{conn_error, io_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = resolve_payload(&args)?;

    let stream = TcpStream::connect(&args.addr)
        .map_err(|err| io_error(&format!("connect {} failed", args.addr), err))?;
    let conn = args.conn.open(stream)?;

    conn.write(Bytes::from(payload))
        .map_err(|err| conn_error("send failed", err))?;
    conn.flush(wait_timeout)
        .map_err(|err| conn_error("send failed", err))?;

    if args.wait {
        let response = wait_for_response(&conn, wait_timeout)?;
        print_message(response.as_ref(), conn.peer(), format);
    }

    conn.close();
    Ok(SUCCESS)
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(json) = &args.json {
        serde_json::from_str::<serde_json::Value>(json)
            .map_err(|err| CliError::new(USAGE, format!("--json is not valid JSON: {err}")))?;
        return Ok(json.as_bytes().to_vec());
    }
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn wait_for_response(conn: &Connection, timeout: std::time::Duration) -> CliResult<Bytes> {
    match conn.recv_timeout(timeout) {
        Ok(Some(message)) => Ok(message),
        Ok(None) if conn.is_active() => Err(CliError::new(
            TIMEOUT,
            format!("no response within {timeout:?}"),
        )),
        Ok(None) => Err(CliError::new(
            crate::exit::FAILURE,
            match conn.close_reason() {
                Some(reason) => format!("connection ended before a response: {reason}"),
                None => "connection ended before a response".to_string(),
            },
        )),
        Err(err) => Err(conn_error("receive failed", err)),
    }
}
