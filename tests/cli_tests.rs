//! Integration tests for the ocwatch binary
//!
//! Covers argument parsing, configuration exit codes and signal shutdown.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tempfile::TempDir;

const OCWATCH_BINARY: &str = env!("CARGO_BIN_EXE_ocwatch");

fn ocwatch(config: &Path) -> Command {
    let mut cmd = Command::new(OCWATCH_BINARY);
    cmd.arg("--config")
        .arg(config)
        .env_remove("JOURNAL_STREAM")
        .env_remove("OCWATCH_CONFIG");
    cmd
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_help_lists_subcommands() {
    let output = Command::new(OCWATCH_BINARY)
        .arg("--help")
        .output()
        .expect("Failed to run ocwatch --help");

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("run"));
    assert!(stdout.contains("poll"));
    assert!(stdout.contains("check-config"));
}

#[test]
fn test_check_config_prints_effective_values() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[vpn]\nurl = \"https://vpn.example.com/\"\n");

    let output = ocwatch(&config).arg("check-config").output().unwrap();

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("is valid"));
    assert!(stdout.contains("health_check_grace_period_secs = 30"));
}

#[test]
fn test_invalid_config_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[vpn]\nurl = \"ftp://vpn.example.com/\"\n");

    let output = ocwatch(&config).arg("check-config").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_missing_config_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let output = ocwatch(&dir.path().join("absent.toml"))
        .arg("check-config")
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_poll_without_cookie_store_settings_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir, "[vpn]\nurl = \"https://vpn.example.com/\"\n");

    let output = ocwatch(&config).arg("poll").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cookie_store.path"));
}

#[test]
fn test_run_without_openconnect_binary_exits_with_code_2() {
    let dir = TempDir::new().unwrap();
    let config = write_config(
        &dir,
        "[openconnect]\nbinary = \"/nonexistent/openconnect\"\n\n[vpn]\nurl = \"https://vpn.example.com/\"\n",
    );

    let output = ocwatch(&config).arg("run").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&output.stderr).contains("not found"));
}

#[test]
fn test_dry_run_exits_cleanly_on_sigterm() {
    let dir = TempDir::new().unwrap();
    let handoff = dir.path().join("dsid");
    std::fs::write(&handoff, "test-dsid").unwrap();
    let config = write_config(
        &dir,
        &format!(
            "[controller]\ninterval_secs = 1\n\n[dsid_writer]\nfile = \"{}\"\n\n[vpn]\nurl = \"https://vpn.example.com/\"\n",
            handoff.display()
        ),
    );

    let mut child = ocwatch(&config)
        .args(["run", "--dry-run"])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    std::thread::sleep(Duration::from_millis(1500));
    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let status = child.wait().unwrap();
    assert!(status.success());
}
