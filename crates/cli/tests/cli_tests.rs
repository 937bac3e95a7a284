//! CLI integration tests

use std::process::Command;

fn sdsm() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sdsm"));
    // Keep the user's config file and environment out of the tests
    cmd.env_remove("SDSM_API_URL")
        .env_remove("SDSM_ROOT_PATH")
        .env("HOME", std::env::temp_dir());
    cmd
}

/// Test that the CLI shows help
#[test]
fn test_cli_help() {
    let output = sdsm()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI help should succeed");
    assert!(stdout.contains("SDSM Server Supervisor"), "Should show app name");
    assert!(stdout.contains("get"), "Should show get command");
    assert!(stdout.contains("progress"), "Should show progress command");
    assert!(stdout.contains("deploy"), "Should show deploy command");
    assert!(stdout.contains("debug"), "Should show debug command");
}

/// Test that the CLI shows version
#[test]
fn test_cli_version() {
    let output = sdsm()
        .arg("--version")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "CLI version should succeed");
    assert!(stdout.contains("sdsm"), "Should show binary name");
}

#[test]
fn test_get_help_lists_queries() {
    let output = sdsm()
        .args(["get", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    for query in ["host", "servers", "processes", "progress"] {
        assert!(stdout.contains(query), "Should show {} query", query);
    }
}

#[test]
fn test_deploy_help_shows_options() {
    let output = sdsm()
        .args(["deploy", "--help"])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success());
    assert!(stdout.contains("--root"), "Should show root option");
    assert!(stdout.contains("--beta"), "Should show beta option");
    assert!(stdout.contains("--app-id"), "Should show app id option");
}

#[test]
fn test_invalid_format_rejected() {
    let output = sdsm()
        .args(["--format", "xml", "get", "host"])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "Invalid format should fail");
}

#[test]
fn test_local_progress_as_json() {
    let dir = tempfile::TempDir::new().unwrap();
    let log = dir.path().join("updates.log");
    std::fs::write(
        &log,
        "2024-05-01 10:00:00: Deployment (STEAMCMD) started\n\
         2024-05-01 10:00:02: Deployment (STEAMCMD) completed successfully in 2s\n\
         2024-05-01 10:00:03: Deployment (RELEASE) started\n\
         2024-05-01 10:00:04: Update state (0x61) downloading, progress: 40.00 (400 / 1000)\n",
    )
    .unwrap();

    let output = sdsm()
        .args(["--format", "json", "progress", "--log"])
        .arg(&log)
        .output()
        .expect("Failed to execute command");

    assert!(output.status.success());
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(snapshot["in_progress"], true);
    assert_eq!(snapshot["overall_percent"], 70);
    assert_eq!(snapshot["stages"][1]["percent"], 40);
}

#[test]
fn test_local_progress_missing_log_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let output = sdsm()
        .args(["progress", "--log"])
        .arg(dir.path().join("missing.log"))
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
}

#[test]
fn test_deploy_rejects_non_numeric_app_id() {
    let root = tempfile::TempDir::new().unwrap();
    let output = sdsm()
        .args(["deploy", "--app-id", "12;rm", "--root"])
        .arg(root.path())
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    // The failure is still recorded in the deployment log
    let log = std::fs::read_to_string(root.path().join("logs").join("updates.log")).unwrap();
    assert!(log.contains("Deployment (RELEASE) completed with errors"));
}
