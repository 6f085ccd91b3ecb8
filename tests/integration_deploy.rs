//! Integration tests for the `deploy` command against the local
//! state-file provisioner.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn stratus() -> Command {
    Command::cargo_bin("stratus").unwrap()
}

fn write_template(dir: &TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

const STACK: &str = r#"
[parameters.environment]
type = "string"

[resources.vnet]
type = "network/virtualNetwork"
api_version = "2024-01-01"
properties = { addressSpace = "10.0.0.0/16", tag = "${parameters.environment}" }

[resources.subnet]
type = "network/subnet"
api_version = "2024-01-01"
parent = "vnet"
properties = { range = "10.0.1.0/24" }

[outputs.subnetId]
value = "${resources.subnet.id}"
"#;

#[test]
fn deploy_materializes_and_prints_outputs() {
    let dir = TempDir::new().unwrap();
    let path = write_template(&dir, "main.toml", STACK);

    stratus()
        .args([
            "deploy",
            path.to_str().unwrap(),
            "--scope",
            "sub/dev",
            "--param",
            "environment=dev",
            "--no-progress",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Deployment complete"))
        .stdout(predicate::str::contains("subnetId"));
}

#[test]
fn deploy_with_a_state_file_converges_to_no_ops() {
    let dir = TempDir::new().unwrap();
    let path = write_template(&dir, "main.toml", STACK);
    let state = dir.path().join("state.json");

    let args = [
        "deploy",
        path.to_str().unwrap(),
        "--scope",
        "sub/dev",
        "--param",
        "environment=dev",
        "--state",
        state.to_str().unwrap(),
        "--no-progress",
    ];

    stratus().args(args).assert().success();
    assert!(state.exists());

    // Identical payloads against the persisted state: nothing to do.
    stratus()
        .args(args)
        .assert()
        .success()
        .stdout(predicate::str::contains("no-op"));
}

#[test]
fn deploy_dry_run_prints_the_plan_without_state() {
    let dir = TempDir::new().unwrap();
    let path = write_template(&dir, "main.toml", STACK);
    let state = dir.path().join("state.json");

    stratus()
        .args([
            "deploy",
            path.to_str().unwrap(),
            "--scope",
            "sub/dev",
            "--param",
            "environment=dev",
            "--state",
            state.to_str().unwrap(),
            "--dry-run",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plan for scope"))
        .stdout(predicate::str::contains("after vnet"));
    assert!(!state.exists());
}

#[test]
fn deploy_emits_a_json_report() {
    let dir = TempDir::new().unwrap();
    let path = write_template(&dir, "main.toml", STACK);

    stratus()
        .args([
            "deploy",
            path.to_str().unwrap(),
            "--scope",
            "sub/dev",
            "--param",
            "environment=dev",
            "--format",
            "json",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"succeeded\": true"))
        .stdout(predicate::str::contains("\"subnetId\""));
}

#[test]
fn deploy_fails_on_a_missing_parameter() {
    let dir = TempDir::new().unwrap();
    let path = write_template(&dir, "main.toml", STACK);

    stratus()
        .args(["deploy", path.to_str().unwrap(), "--scope", "sub/dev"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing required parameter"))
        .stderr(predicate::str::contains("environment"));
}

#[test]
fn deploy_exits_nonzero_on_resolution_failure() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.tagged]
type = "test/unit"
api_version = "2024-01-01"
properties = { tag = "${environment('tenant')}" }
"#,
    );

    stratus()
        .args([
            "deploy",
            path.to_str().unwrap(),
            "--scope",
            "sub/dev",
            "--no-progress",
        ])
        .assert()
        .failure()
        .stdout(predicate::str::contains("Partial deployment"))
        .stderr(predicate::str::contains("failures"));
}

#[test]
fn deploy_runs_nested_modules() {
    let dir = TempDir::new().unwrap();
    write_template(
        &dir,
        "storage.toml",
        r#"
[parameters.prefix]
type = "string"

[resources.account]
type = "storage/account"
api_version = "2024-01-01"
properties = { name = "${parameters.prefix}-sa" }

[outputs.accountName]
value = "${resources.account.properties.name}"
"#,
    );
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[parameters.environment]
type = "string"

[modules.storage]
path = "storage.toml"
parameters = { prefix = "${parameters.environment}" }

[outputs.account]
value = "${modules.storage.outputs.accountName}"
"#,
    );

    stratus()
        .args([
            "deploy",
            path.to_str().unwrap(),
            "--scope",
            "sub/dev",
            "--param",
            "environment=dev",
            "--no-progress",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("storage/account"))
        .stdout(predicate::str::contains("dev-sa"));
}
