//! Integration tests for the `robovac` CLI binary.
//!
//! Argument parsing, offline decoding, configuration handling, and error
//! exit codes, without a vacuum on the network.
#![allow(clippy::unwrap_used)]

use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────────

const NO_HOME: &str = "/tmp/robovac-cli-test-nonexistent";

/// Build a [`Command`] for the `robovac` binary with env isolation.
///
/// Clears all `ROBOVAC_*` env vars and points config directories at
/// `home` so tests never touch the user's real configuration.
fn robovac_cmd_in(home: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("robovac");
    cmd.env("HOME", home)
        .env("XDG_CONFIG_HOME", home.join(".config"))
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .env_remove("ROBOVAC_DEVICE")
        .env_remove("ROBOVAC_HOST")
        .env_remove("ROBOVAC_DEVICE_ID")
        .env_remove("ROBOVAC_LOCAL_KEY")
        .env_remove("ROBOVAC_PORT")
        .env_remove("ROBOVAC_OUTPUT")
        .env_remove("ROBOVAC_TIMEOUT");
    cmd
}

fn robovac_cmd() -> assert_cmd::Command {
    robovac_cmd_in(Path::new(NO_HOME))
}

/// Concatenate stdout + stderr from a command output for flexible matching.
fn combined_output(output: &std::process::Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    format!("{stdout}{stderr}")
}

/// A home directory holding a config with one device.
fn configured_home() -> tempfile::TempDir {
    let home = tempfile::tempdir().unwrap();
    let dir = home.path().join(".config").join("robovac");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("config.toml"),
        r#"
[devices.hall]
device_id = "eb0123456789abcdefgh"
host = "127.0.0.1"
local_key = "0123456789abcdef"

[devices.hall.rooms]
kitchen = "AggB"
lounge = "AggC"
"#,
    )
    .unwrap();
    home
}

/// A localhost port with nothing listening on it.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

// ── Basic invocation ────────────────────────────────────────────────

#[test]
fn test_no_args_shows_help() {
    let output = robovac_cmd().output().unwrap();
    assert_eq!(output.status.code(), Some(2), "Expected exit code 2");
    let text = combined_output(&output);
    assert!(text.contains("Usage"), "Expected 'Usage' in output:\n{text}");
}

#[test]
fn test_help_flag() {
    robovac_cmd().arg("--help").assert().success().stdout(
        predicate::str::contains("RoboVac")
            .and(predicate::str::contains("status"))
            .and(predicate::str::contains("clean-room"))
            .and(predicate::str::contains("decode")),
    );
}

#[test]
fn test_version_flag() {
    robovac_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("robovac"));
}

#[test]
fn test_completions_bash() {
    robovac_cmd()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::is_empty().not());
}

#[test]
fn test_invalid_fan_speed() {
    let output = robovac_cmd().args(["fan-speed", "ludicrous"]).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Device resolution errors ────────────────────────────────────────

#[test]
fn test_status_without_config() {
    let output = robovac_cmd().arg("status").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    let text = combined_output(&output);
    assert!(
        text.contains("No vacuum configured"),
        "Expected config hint:\n{text}"
    );
}

#[test]
fn test_short_local_key_is_rejected() {
    let output = robovac_cmd()
        .args([
            "--device-id",
            "eb01",
            "--host",
            "127.0.0.1",
            "--local-key",
            "short",
            "status",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
    assert!(combined_output(&output).contains("local_key"));
}

#[test]
fn test_unreachable_vacuum_exits_with_connection_code() {
    let port = closed_port();
    let output = robovac_cmd()
        .args([
            "--device-id",
            "eb01",
            "--host",
            "127.0.0.1",
            "--port",
            &port.to_string(),
            "--local-key",
            "0123456789abcdef",
            "--timeout",
            "2",
            "status",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(7));
    let text = combined_output(&output);
    assert!(
        text.contains(&format!("127.0.0.1:{port}")),
        "Expected address in error:\n{text}"
    );
}

// ── Offline decoding ────────────────────────────────────────────────

#[test]
fn test_decode_cleaning_status() {
    robovac_cmd()
        .args(["-o", "plain", "decode", "status", r#"{"153":"BgoAEAUyAA=="}"#])
        .assert()
        .success()
        .stdout("Cleaning\n");
}

#[test]
fn test_decode_fault_code() {
    robovac_cmd()
        .args(["-o", "plain", "decode", "status", r#"{"6":105}"#])
        .assert()
        .success()
        .stdout("Error 105\n");
}

#[test]
fn test_decode_json_output() {
    robovac_cmd()
        .args([
            "-o",
            "json-compact",
            "decode",
            "status",
            r#"{"153":"BhADAAIAAA==","8":100}"#,
        ])
        .assert()
        .success()
        .stdout(
            predicate::str::contains(r#""state":"docked""#)
                .and(predicate::str::contains(r#""battery":100"#)),
        );
}

#[test]
fn test_decode_rejects_bad_json() {
    let output = robovac_cmd()
        .args(["decode", "status", "{not json"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_decode_rejects_bad_hex() {
    let output = robovac_cmd()
        .args(["decode", "datagram", "zz"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(2));
}

// ── Configuration ───────────────────────────────────────────────────

#[test]
fn test_config_path() {
    robovac_cmd()
        .args(["config", "path"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
}

#[test]
fn test_config_devices_lists_profiles() {
    let home = configured_home();
    robovac_cmd_in(home.path())
        .args(["-o", "plain", "config", "devices"])
        .assert()
        .success()
        .stdout("hall\n");
}

#[test]
fn test_rooms_lists_configured_rooms() {
    let home = configured_home();
    robovac_cmd_in(home.path())
        .args(["-o", "plain", "rooms"])
        .assert()
        .success()
        .stdout("kitchen\nlounge\n");
}

#[test]
fn test_config_show_masks_local_key() {
    let home = configured_home();
    robovac_cmd_in(home.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(
            predicate::str::contains("[devices.hall]")
                .and(predicate::str::contains("****"))
                .and(predicate::str::contains("0123456789abcdef\"").not()),
        );
}

#[test]
fn test_config_use_unknown_device() {
    let home = configured_home();
    let output = robovac_cmd_in(home.path())
        .args(["config", "use", "attic"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(4));
    assert!(combined_output(&output).contains("hall"));
}
