//! Integration tests for the pmp-harness binary.

use env_logger as _;
use log as _;
use pmp_core as _;
use std::path::PathBuf;
use std::process::Command;

fn binary_path() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop();
    path.pop();
    path.join("pmp-harness")
}

#[test]
fn default_run_passes_every_case() {
    let output = Command::new(binary_path())
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run pmp-harness");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.matches("SUCCESS\n").count(), 6);
    assert!(stdout.starts_with("M read...SUCCESS\n"));
    assert!(stdout.ends_with("PASS\n"));
}

#[test]
fn help_prints_usage() {
    let output = Command::new(binary_path())
        .arg("--help")
        .output()
        .expect("failed to run pmp-harness");

    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("Usage: pmp-harness"));
}

#[test]
fn unknown_argument_exits_with_usage() {
    let output = Command::new(binary_path())
        .arg("--bogus")
        .output()
        .expect("failed to run pmp-harness");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("error: unexpected argument: --bogus"));
}
