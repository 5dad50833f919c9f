//! CLI Exit Code Tests
//!
//! Runs the built binary and checks that every setup failure exits with 2.

use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

fn trackscribe(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_trackscribe"))
        .args(args)
        .current_dir(dir)
        .env_remove("LOG_FILE")
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("trackscribe.yaml");
    std::fs::write(&path, body).unwrap();
    path.display().to_string()
}

#[test]
fn test_config_command_succeeds() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "worker_count: 2\n");

    let output = trackscribe(temp.path(), &["--config", &config, "config"]);
    assert_eq!(output.status.code(), Some(0));
}

#[test]
fn test_unopenable_log_file_exits_2() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), "worker_count: 2\n");
    let log_file = temp.path().join("missing").join("dir").join("run.log");

    let output = trackscribe(
        temp.path(),
        &["--config", &config, "--log-file", &log_file.display().to_string(), "config"],
    );

    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("log file"));
}

#[test]
fn test_unreadable_config_exits_2() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("nope.yaml");

    let output = trackscribe(temp.path(), &["--config", &missing.display().to_string(), "config"]);
    assert_eq!(output.status.code(), Some(2));
}
