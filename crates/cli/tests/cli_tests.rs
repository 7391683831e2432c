//! CLI integration tests

use std::process::Command;

fn upfctl(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_upfctl"))
        .args(args)
        .env_remove("UPF_OPERATOR_URL")
        .output()
        .expect("Failed to execute command")
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = upfctl(&["--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("UPF workload operator"), "Should show app name");
    assert!(stdout.contains("status"), "Should show status command");
    assert!(stdout.contains("relations"), "Should show relations command");
    assert!(stdout.contains("event"), "Should show event command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = upfctl(&["--version"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("upfctl"), "Should show binary name");
}

/// Test event subcommand help lists every event
#[test]
fn test_event_help() {
    let output = upfctl(&["event", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Event help should succeed");
    for command in [
        "install",
        "remove",
        "config",
        "attach",
        "relation-joined",
        "relation-changed",
        "relation-broken",
        "container-ready",
        "container-unready",
    ] {
        assert!(stdout.contains(command), "Should show {} command", command);
    }
}

/// Test relation-joined subcommand help
#[test]
fn test_relation_joined_help() {
    let output = upfctl(&["event", "relation-joined", "--help"]);
    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--interface"), "Should show interface option");
    assert!(stdout.contains("--id"), "Should show id option");
    assert!(stdout.contains("--remote"), "Should show remote option");
}

/// Test format option is accepted
#[test]
fn test_format_option() {
    let output = upfctl(&["--format", "json", "--help"]);
    assert!(output.status.success(), "Format option should be accepted");
}

/// Test invalid command handling
#[test]
fn test_invalid_command() {
    let output = upfctl(&["reboot"]);
    assert!(!output.status.success(), "Invalid command should fail");
}

/// Test missing argument handling
#[test]
fn test_missing_argument() {
    let output = upfctl(&["event", "attach", "web-image"]);
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "Missing argument should fail");
    assert!(stderr.contains("IMAGE"), "Should name the missing argument");
}

/// Test unreachable operator reports an error
#[test]
fn test_unreachable_operator() {
    let output = upfctl(&["--api-url", "http://127.0.0.1:1", "status"]);
    assert!(!output.status.success(), "Unreachable operator should fail");
}
