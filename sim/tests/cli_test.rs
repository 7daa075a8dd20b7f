//! End-to-end tests for the llmsim binary

use std::fs;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Command isolated from the user's config and log directories
fn llmsim(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("llmsim").unwrap();
    cmd.env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_CONFIG_HOME", home.path().join("config"))
        .current_dir(home.path());
    cmd
}

fn write_config(home: &TempDir, yaml: &str) -> std::path::PathBuf {
    let path = home.path().join("llmsim.yml");
    fs::write(&path, yaml).unwrap();
    path
}

#[test]
fn test_config_prints_effective_yaml() {
    let home = TempDir::new().unwrap();
    let config = write_config(&home, "slo:\n  target: 0.95\nsimulation:\n  requests: 12\n");

    llmsim(&home)
        .arg("--config")
        .arg(&config)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("target: 0.95"))
        .stdout(predicate::str::contains("requests: 12"))
        .stdout(predicate::str::contains("capacity: 10000"));
}

#[test]
fn test_simulate_json_output() {
    let home = TempDir::new().unwrap();

    llmsim(&home)
        .args(["simulate", "--requests", "10", "--seed", "1", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"report\""))
        .stdout(predicate::str::contains("\"metrics\""))
        .stdout(predicate::str::contains("\"seed\": 1"))
        .stdout(predicate::str::contains("\"requests\": 10"));
}

#[test]
fn test_simulate_text_output() {
    let home = TempDir::new().unwrap();

    llmsim(&home)
        .args(["simulate", "-n", "5", "-s", "3"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulation"))
        .stdout(predicate::str::contains("Event bus"));

    assert!(home.path().join("data/llmsim/logs/llmsim.log").exists());
}

#[test]
fn test_simulate_rejects_bad_error_rate() {
    let home = TempDir::new().unwrap();

    llmsim(&home)
        .args(["simulate", "--error-rate", "1.5"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid simulation config"));
}

#[test]
fn test_missing_config_file_fails() {
    let home = TempDir::new().unwrap();

    llmsim(&home)
        .args(["--config", "does-not-exist.yml", "config"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
