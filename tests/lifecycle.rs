//! Process lifecycle: start, stop and reload through the binary and the API.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use vicuna::config::HandlerSpec;
use vicuna::lifecycle::StopOutcome;
use vicuna::{Server, ServerError};

mod common;

const BIN: &str = env!("CARGO_BIN_EXE_vicuna-server");

fn wait_for(timeout: Duration, check: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    check()
}

fn http_get(port: u16, path: &str) -> String {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(
        stream,
        "GET {} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        path
    )
    .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).unwrap();
    response
}

fn write_config(dir: &Path, port: u16) -> std::path::PathBuf {
    let path = dir.join("server.toml");
    let config = format!(
        r#"
host = "127.0.0.1"
port = {port}
pid_file = "{pid}"
log_level = "warn"
worker_num = 1
task_worker_num = 1
max_connections = 256
handlers = ["DefaultHandler"]
"#,
        port = port,
        pid = dir.join("run/server.pid").display(),
    );
    std::fs::write(&path, config).unwrap();
    path
}

#[test]
fn test_stop_without_pid_file_returns_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = common::config_with(vec![HandlerSpec::class("DefaultHandler")]);
    config.pid_file = dir.path().join("absent.pid");
    let server = Server::new(config).unwrap();

    let started = Instant::now();
    assert_eq!(server.stop().unwrap(), StopOutcome::NotRunning);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(!server.reload().unwrap());
}

#[test]
fn test_stale_pid_file_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("stale.pid");

    let mut child = Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    std::fs::write(&pid_file, dead_pid.to_string()).unwrap();

    let mut config = common::config_with(vec![HandlerSpec::class("DefaultHandler")]);
    config.pid_file = pid_file.clone();
    let server = Server::new(config).unwrap();

    assert_eq!(server.stop().unwrap(), StopOutcome::Stale);
    assert!(!pid_file.exists());
}

#[test]
fn test_empty_handler_list_fails_before_binding() {
    let port = common::free_port();
    let mut config = common::config_with(Vec::new());
    config.port = port;
    let server = Server::new(config).unwrap();

    assert!(matches!(
        server.start(),
        Err(ServerError::Config(vicuna::config::ConfigError::NoHandlers))
    ));
    assert!(std::net::TcpListener::bind(("127.0.0.1", port)).is_ok());
}

#[test]
fn test_cli_exits_nonzero_on_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "handlers = []\nworker_num = 0\n").unwrap();

    let status = Command::new(BIN)
        .arg("start")
        .arg(&path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_cli_exits_nonzero_without_handlers() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.toml");
    std::fs::write(&path, "handlers = []\n").unwrap();

    let status = Command::new(BIN)
        .arg("start")
        .arg(&path)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(1));
}

#[test]
fn test_start_serve_reload_stop() {
    let dir = tempfile::tempdir().unwrap();
    let port = common::free_port();
    let config = write_config(dir.path(), port);
    let pid_file = dir.path().join("run/server.pid");

    let mut master = Command::new(BIN)
        .arg("start")
        .arg(&config)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    assert!(wait_for(Duration::from_secs(10), || pid_file.exists()), "master never wrote its pid file");
    let recorded: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert_eq!(recorded, master.id());

    let response = http_get(port, "/hello?x=1");
    assert!(response.starts_with("HTTP/1.1 200"), "unexpected response: {}", response);
    assert!(response.contains("\"QUERY_STRING\":\"x=1\""));

    let reload = Command::new(BIN).arg("reload").arg(&config).status().unwrap();
    assert!(reload.success());
    let response = http_get(port, "/");
    assert!(response.starts_with("HTTP/1.1 200"));

    let stop = Command::new(BIN).arg("stop").arg(&config).status().unwrap();
    assert!(stop.success());
    assert!(!pid_file.exists());

    let status = master.wait().unwrap();
    assert!(status.success());
}
