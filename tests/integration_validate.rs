//! Integration tests for the `validate` command.

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

#[test]
fn validate_accepts_a_well_formed_template() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.vnet]
type = "network/virtualNetwork"
api_version = "2024-01-01"
properties = { addressSpace = "10.0.0.0/16" }

[resources.subnet]
type = "network/subnet"
api_version = "2024-01-01"
parent = "vnet"
properties = { range = "10.0.1.0/24" }
"#,
    );

    stratus()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Valid"))
        .stdout(predicate::str::contains("2 nodes"));
}

#[test]
fn validate_emits_json_when_asked() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.one]
type = "test/unit"
api_version = "2024-01-01"
properties = { tier = "base" }
"#,
    );

    stratus()
        .args(["validate", path.to_str().unwrap(), "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"valid\": true"))
        .stdout(predicate::str::contains("\"nodes\": 1"));
}

#[test]
fn validate_rejects_a_missing_template() {
    stratus()
        .args(["validate", "no/such/template.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("template not found").or(predicate::str::contains("Error")));
}

#[test]
fn validate_reports_dependency_cycles_with_the_path() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.a]
type = "test/unit"
api_version = "2024-01-01"
depends_on = ["b"]
properties = { tier = "base" }

[resources.b]
type = "test/unit"
api_version = "2024-01-01"
properties = { upstream = "${resources.a.id}" }
"#,
    );

    stratus()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("circular dependency"));
}

#[test]
fn validate_suggests_close_names_for_typos() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.storage]
type = "storage/account"
api_version = "2024-01-01"
properties = { sku = "standard" }

[resources.web]
type = "web/app"
api_version = "2024-01-01"
depends_on = ["stroage"]
properties = { tier = "basic" }
"#,
    );

    stratus()
        .args(["validate", path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("stroage"))
        .stderr(predicate::str::contains("storage"));
}
