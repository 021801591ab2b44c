#![cfg(all(unix, feature = "cli"))]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

fn free_addr() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").to_string()
}

fn spawn_server(args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_stockings"))
        .args(["--log-level", "error"])
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("server should start")
}

fn wait_for_listener(addr: &str, timeout: Duration) {
    let start = Instant::now();
    loop {
        if TcpStream::connect(addr).is_ok() {
            return;
        }
        if start.elapsed() >= timeout {
            panic!("listener at {addr} never came up");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_stockings"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("cli should run")
}

fn stop(mut child: Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn version_prints_package_version() {
    let output = run_cli(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn send_wait_against_echo_round_trips() {
    let addr = free_addr();
    let server = spawn_server(&["echo", &addr]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let output = run_cli(&[
        "--format",
        "json",
        "send",
        &addr,
        "--data",
        "Test Message",
        "--wait",
    ]);

    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    let value: serde_json::Value =
        serde_json::from_str(stdout.trim()).expect("json output line");
    assert_eq!(value["payload"], "Test Message");
    assert_eq!(value["size"], 12);

    stop(server);
}

#[test]
fn handshake_round_trip_with_matching_settings() {
    let addr = free_addr();
    let server = spawn_server(&["echo", &addr, "--handshake"]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let output = run_cli(&[
        "--format", "raw", "send", &addr, "--data", "ping", "--wait", "--handshake",
    ]);

    assert!(output.status.success(), "{output:?}");
    assert_eq!(output.stdout, b"ping");

    stop(server);
}

#[test]
fn handshake_mismatch_exits_with_handshake_code() {
    let addr = free_addr();
    let server = spawn_server(&["echo", &addr, "--handshake", "--max-msg-len", "256"]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let output = run_cli(&[
        "send",
        &addr,
        "--data",
        "ping",
        "--handshake",
        "--handshake-timeout",
        "1s",
    ]);

    assert_eq!(output.status.code(), Some(30), "{output:?}");

    stop(server);
}

#[test]
fn listen_prints_raw_frames_from_plain_socket() {
    let addr = free_addr();
    let server = spawn_server(&["--format", "pretty", "listen", &addr, "--count", "2"]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let mut client = TcpStream::connect(&addr).expect("connect to listener");
    client.write_all(b"\x00\x0cTest Message\x00\x03two").unwrap();

    let output = server.wait_with_output().expect("listen should exit");
    assert!(output.status.success(), "{output:?}");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("size=12 payload=Test Message"));
    assert!(stdout.contains("size=3 payload=two"));

    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest);
}

#[test]
fn send_to_closed_port_fails() {
    let addr = free_addr();
    let output = run_cli(&["send", &addr, "--data", "x"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect"));
}

#[test]
fn oversize_payload_is_rejected() {
    let addr = free_addr();
    let server = spawn_server(&["echo", &addr, "--max-msg-len", "16"]);
    wait_for_listener(&addr, Duration::from_secs(3));

    let output = run_cli(&[
        "send",
        &addr,
        "--max-msg-len",
        "16",
        "--data",
        "this payload is far too long",
    ]);
    assert_eq!(output.status.code(), Some(60), "{output:?}");

    stop(server);
}
