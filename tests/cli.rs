use std::fs;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command};
use std::thread;
use std::time::{Duration, Instant};

use assert_cmd::prelude::*;
use nframe::{JsonStore, NframeClient, PidLock, StoreDocument, StoreEngine};
use predicates::str::contains;
use serde_json::{json, Value};
use tempfile::TempDir;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn seed(path: &Path, value: Value) {
    match value {
        Value::Object(map) => JsonStore::new(path).add_data(map).unwrap(),
        other => panic!("{} is not an object", other),
    }
}

/// kills the server when a test ends, even a failing one
struct ServerProcess(Child);

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

// `nframe-server -V` should print the version
#[test]
fn server_cli_version() {
    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["-V"])
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

// `nframe-client -V` should print the version
#[test]
fn client_cli_version() {
    Command::cargo_bin("nframe-client")
        .unwrap()
        .args(&["-V"])
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn server_cli_invalid_port() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["--port", "not-a-port", "--lock-file", "test.pid"])
        .current_dir(&temp_dir)
        .assert()
        .failure();
}

#[test]
fn server_cli_invalid_ip() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["--ip", "not-an-ip", "--lock-file", "test.pid"])
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("IP address"));
}

// `--export` should write the store and exit without serving
#[test]
fn server_cli_export() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    seed(&temp_dir.path().join("data.json"), json!({"key1": "value1"}));

    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["--lock-file", "test.pid", "--export", "export.json"])
        .current_dir(&temp_dir)
        .assert()
        .success();

    let exported: StoreDocument =
        serde_json::from_slice(&fs::read(temp_dir.path().join("export.json")).unwrap()).unwrap();
    assert_eq!(Value::Object(exported.data), json!({"key1": "value1"}));
    // the lock was released
    assert!(!temp_dir.path().join("test.pid").exists());
}

// `--import ... --exit` should merge the file into the store and exit
#[test]
fn server_cli_import() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    seed(&temp_dir.path().join("data.json"), json!({"key1": "value1"}));
    seed(&temp_dir.path().join("import.json"), json!({"key2": "value2"}));

    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&[
            "--data-file",
            "data.json",
            "--lock-file",
            "test.pid",
            "--import",
            "import.json",
            "--exit",
        ])
        .current_dir(&temp_dir)
        .assert()
        .success();

    let data = JsonStore::new(temp_dir.path().join("data.json")).load().unwrap();
    assert_eq!(Value::Object(data), json!({"key1": "value1", "key2": "value2"}));
}

#[test]
fn server_cli_corrupt_lock_fails() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    fs::write(temp_dir.path().join("test.pid"), "garbage").unwrap();

    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["--lock-file", "test.pid", "--export", "export.json"])
        .current_dir(&temp_dir)
        .assert()
        .failure()
        .stderr(contains("improperly formatted"));
    assert!(!temp_dir.path().join("export.json").exists());
}

// `--force-unlock` should clear a lock left behind by another process
#[test]
fn server_cli_force_unlock() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let lock_path = temp_dir.path().join("test.pid");
    PidLock::new(&lock_path)
        .with_pid(u64::from(std::process::id()) + 1)
        .acquire()
        .unwrap();

    Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["--lock-file", "test.pid", "--force-unlock", "--exit"])
        .current_dir(&temp_dir)
        .assert()
        .success();
    assert!(!lock_path.exists());
}

#[test]
fn client_cli_unreachable_server() {
    let addr = format!("127.0.0.1:{}", free_port());
    Command::cargo_bin("nframe-client")
        .unwrap()
        .args(&["--addr", &addr, "get"])
        .assert()
        .failure()
        .stderr(contains("Error while communicating"));
}

#[test]
fn client_cli_add_requires_an_object() {
    Command::cargo_bin("nframe-client")
        .unwrap()
        .args(&["add", "[1, 2]"])
        .assert()
        .failure();
}

#[test]
fn client_cli_against_server() {
    let temp_dir = TempDir::new().expect("unable to create temporary working directory");
    let port = free_port().to_string();
    let addr = format!("127.0.0.1:{}", port);

    let child = Command::cargo_bin("nframe-server")
        .unwrap()
        .args(&["--ip", "127.0.0.1", "--port", &port, "--lock-file", "test.pid"])
        .current_dir(&temp_dir)
        .spawn()
        .unwrap();
    let _server = ServerProcess(child);

    // wait for the server to come up
    let client = NframeClient::new(addr.as_str()).unwrap();
    let start = Instant::now();
    while client.get_data().is_failed() {
        assert!(start.elapsed() < Duration::from_secs(10), "server did not start");
        thread::sleep(Duration::from_millis(100));
    }
    // the serving process holds the lock
    assert!(temp_dir.path().join("test.pid").exists());

    Command::cargo_bin("nframe-client")
        .unwrap()
        .args(&["--addr", &addr, "add", "{\"key1\": \"value1\"}"])
        .assert()
        .success()
        .stdout(contains("add data"));

    Command::cargo_bin("nframe-client")
        .unwrap()
        .args(&["--addr", &addr, "get"])
        .assert()
        .success()
        .stdout(contains("value1"));
}
