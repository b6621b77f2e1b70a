// ABOUTME: Integration tests for the dockr CLI commands.
// ABOUTME: Validates --help output, init, and plan without a container runtime.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn dockr_cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("dockr"))
}

#[test]
fn help_shows_commands() {
    dockr_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("init"))
        .stdout(predicate::str::contains("plan"))
        .stdout(predicate::str::contains("apply"))
        .stdout(predicate::str::contains("destroy"))
        .stdout(predicate::str::contains("status"));
}

#[test]
fn init_creates_config_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("dockr.yml");

    dockr_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--unit", "shop"])
        .assert()
        .success();

    assert!(config_path.exists(), "dockr.yml should be created");
    let content = fs::read_to_string(&config_path).unwrap();
    assert!(content.starts_with("unit: shop\n"));
    assert!(content.contains("resources:"));
}

#[test]
fn init_refuses_to_overwrite_existing_config() {
    let temp_dir = tempfile::tempdir().unwrap();
    let config_path = temp_dir.path().join("dockr.yml");

    fs::write(&config_path, "unit: existing").unwrap();

    dockr_cmd()
        .current_dir(temp_dir.path())
        .arg("init")
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    assert_eq!(fs::read_to_string(&config_path).unwrap(), "unit: existing");
}

#[test]
fn plan_lists_creates_for_a_fresh_project() {
    let temp_dir = tempfile::tempdir().unwrap();
    dockr_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--unit", "shop"])
        .assert()
        .success();

    dockr_cmd()
        .current_dir(temp_dir.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(predicate::str::contains("create network/backend"))
        .stdout(predicate::str::contains("create service/app"))
        .stdout(predicate::str::contains("Plan:"));

    // plan never writes state
    assert!(!temp_dir.path().join(".dockr/state").exists());
}

#[test]
fn plan_json_emits_one_event_per_operation() {
    let temp_dir = tempfile::tempdir().unwrap();
    dockr_cmd()
        .current_dir(temp_dir.path())
        .args(["init", "--unit", "shop"])
        .assert()
        .success();

    let output = dockr_cmd()
        .current_dir(temp_dir.path())
        .args(["--json", "plan"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let events: Vec<serde_json::Value> = String::from_utf8(output.stdout)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let planned = events.iter().filter(|e| e["event"] == "planned").count();
    assert_eq!(planned, 4);
    assert_eq!(events.last().unwrap()["event"], "plan");
}

#[test]
fn plan_without_config_fails() {
    let temp_dir = tempfile::tempdir().unwrap();
    dockr_cmd()
        .current_dir(temp_dir.path())
        .arg("plan")
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
}

#[test]
fn quiet_and_json_are_mutually_exclusive() {
    dockr_cmd()
        .args(["--quiet", "--json", "plan"])
        .assert()
        .failure();
}
