//! Integration tests for the `babushka-runner` binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn runner() -> Command {
    Command::cargo_bin("babushka-runner").unwrap()
}

fn write_config(dir: &Path, body: &str) -> String {
    let path = dir.join("config.json");
    fs::write(&path, body).unwrap();
    path.to_str().unwrap().to_string()
}

fn stdout_events(output: &[u8]) -> Vec<Value> {
    String::from_utf8(output.to_vec())
        .unwrap()
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("non-JSON stdout line {l:?}: {e}")))
        .collect()
}

#[test]
fn test_help_lists_arguments() {
    runner()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--run-id"))
        .stdout(predicate::str::contains("--output-dir"))
        .stdout(predicate::str::contains("--dataset"));
}

#[test]
fn test_requires_run_id() {
    runner().args(["--config", "c.json", "--output-dir", "out"]).assert().failure();
}

#[test]
fn test_mock_run_succeeds() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), r#"{"template": "mock", "epochs": 3}"#);
    let out = temp.path().join("out");

    let assert = runner()
        .args(["--run-id", "cli-mock", "--config", &config, "--output-dir", out.to_str().unwrap()])
        .assert()
        .success();

    let events = stdout_events(&assert.get_output().stdout);
    let progress: Vec<(u64, u64)> = events
        .iter()
        .filter(|e| e["type"] == "progress")
        .map(|e| (e["current"].as_u64().unwrap(), e["total"].as_u64().unwrap()))
        .collect();
    assert_eq!(progress, vec![(1, 3), (2, 3), (3, 3)]);

    let artifacts: Vec<&Value> = events.iter().filter(|e| e["type"] == "artifact").collect();
    assert_eq!(artifacts.len(), 1);
    assert_eq!(artifacts[0]["kind"], "model");
    assert!(artifacts[0]["path"].as_str().unwrap().ends_with("model.bin"));
    assert_eq!(artifacts[0]["sha256"].as_str().unwrap().len(), 64);

    let last = events.last().unwrap();
    assert_eq!(last["type"], "status");
    assert_eq!(last["state"], "SUCCEEDED");
    assert!(last["error"].is_null());
    assert!(events.iter().all(|e| e["ts"].as_str().is_some_and(|ts| ts.ends_with('Z'))));

    let model_dir = out.join("model");
    assert_eq!(fs::read_dir(&model_dir).unwrap().count(), 4);
    assert!(model_dir.join("metadata.json").is_file());
    assert!(model_dir.join("signature.json").is_file());
    assert!(model_dir.join("requirements.lock").is_file());
}

#[test]
fn test_missing_config_exits_nonzero() {
    let temp = TempDir::new().unwrap();
    let out = temp.path().join("out");
    let missing = temp.path().join("missing.json");

    let assert = runner()
        .args([
            "--run-id",
            "cli-missing",
            "--config",
            missing.to_str().unwrap(),
            "--output-dir",
            out.to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("\"state\":\"FAILED\""));

    let events = stdout_events(&assert.get_output().stdout);
    let last = events.last().unwrap();
    assert_eq!(last["type"], "status");
    assert!(last["error"].as_str().unwrap().contains("missing.json"));
    assert!(events.iter().any(|e| e["type"] == "log" && e["level"] == "ERROR"));
    assert!(!out.exists());
}

#[test]
fn test_unknown_template_is_a_warning() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), r#"{"template": "xgboost", "epochs": 1, "step_delay_ms": 0}"#);
    let out = temp.path().join("out");

    runner()
        .args(["--run-id", "cli-unknown", "--config", &config, "--output-dir", out.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"level\":\"WARNING\""))
        .stdout(predicate::str::contains("Unknown template: xgboost, using mock"));

    assert!(out.join("model").join("model.bin").is_file());
}

#[test]
fn test_disabled_backends_fall_back_to_mock() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), r#"{"epochs": 1, "step_delay_ms": 0}"#);
    let out = temp.path().join("out");

    runner()
        .env("BABUSHKA_DISABLE_BACKENDS", "ensemble,neural")
        .args(["--run-id", "cli-degraded", "--config", &config, "--output-dir", out.to_str().unwrap()])
        .args(["--template", "tabular"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ensemble backend not available, trying neural"))
        .stdout(predicate::str::contains("neural backend not available, trying mock"));

    let metadata: Value = serde_json::from_slice(&fs::read(out.join("model").join("metadata.json")).unwrap()).unwrap();
    assert_eq!(metadata["framework"], "mock");
}

#[test]
fn test_stderr_is_quiet_by_default() {
    let temp = TempDir::new().unwrap();
    let config = write_config(temp.path(), r#"{"template": "mock", "epochs": 1, "step_delay_ms": 0}"#);
    let out = temp.path().join("out");

    runner()
        .args(["--run-id", "cli-quiet", "--config", &config, "--output-dir", out.to_str().unwrap()])
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}
