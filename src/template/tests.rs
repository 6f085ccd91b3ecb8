//! Tests for template loading and parameter resolution.

use super::*;
use std::fs;
use tempfile::TempDir;

fn write_template(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn loads_full_template() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
# Root template for the dev environment.
[parameters.environment]
type = "string"
default = "dev"

[parameters.prefix]
type = "string"
default = "${parameters.environment}-app"

[resources.vnet]
type = "network/virtualNetwork"
api_version = "2024-01-01"
properties = { addressSpace = "10.0.0.0/16" }

[resources.subnet]
type = "network/subnet"
api_version = "2024-01-01"
parent = "vnet"
properties = { range = "10.0.1.0/24" }

[outputs.vnetName]
value = "${parameters.prefix}-vnet"
"#,
    );

    let template = Template::load(&path).unwrap();
    assert_eq!(template.parameters.len(), 2);
    assert_eq!(template.resources.len(), 2);
    assert_eq!(template.outputs.len(), 1);
    let subnet = template.resources.iter().find(|r| r.name == "subnet").unwrap();
    assert_eq!(subnet.parent.as_deref(), Some("vnet"));
}

#[test]
fn loads_nested_modules() {
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
[modules.storage]
path = "storage.toml"
parameters = { prefix = "prod" }
"#,
    );

    let template = Template::load(&path).unwrap();
    assert_eq!(template.modules.len(), 1);
    let module = &template.modules[0];
    assert_eq!(module.template.resources.len(), 1);
    assert_eq!(module.bindings.get("prefix"), Some(&Value::String("prod".into())));
}

#[test]
fn module_inclusion_cycle_is_rejected() {
    let dir = TempDir::new().unwrap();
    write_template(
        &dir,
        "a.toml",
        r#"
[modules.b]
path = "b.toml"
"#,
    );
    write_template(
        &dir,
        "b.toml",
        r#"
[modules.a]
path = "a.toml"
"#,
    );
    let err = Template::load(dir.path().join("a.toml")).unwrap_err();
    assert!(matches!(err, StratusError::ModuleInclusionCycle { .. }));
}

#[test]
fn resource_and_module_share_a_namespace() {
    let dir = TempDir::new().unwrap();
    write_template(
        &dir,
        "inner.toml",
        r#"
[resources.x]
type = "t"
api_version = "1"
"#,
    );
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.net]
type = "t"
api_version = "1"

[modules.net]
path = "inner.toml"
"#,
    );
    let err = Template::load(&path).unwrap_err();
    assert!(matches!(err, StratusError::DuplicateName { .. }));
}

#[test]
fn unknown_depends_on_target_gets_suggestion() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[resources.storage]
type = "t"
api_version = "1"

[resources.web]
type = "t"
api_version = "1"
depends_on = ["stroage"]
"#,
    );
    let err = Template::load(&path).unwrap_err();
    match err {
        StratusError::UnknownReference { name, closest } => {
            assert_eq!(name, "stroage");
            assert_eq!(closest.as_deref(), Some("storage"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn missing_template_file() {
    let err = Template::load("/definitely/not/here.toml").unwrap_err();
    assert!(matches!(err, StratusError::TemplateNotFound { .. }));
}

#[test]
fn parameter_defaults_may_reference_earlier_parameters() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[parameters.environment]
type = "string"
default = "dev"

[parameters.prefix]
type = "string"
default = "${parameters.environment}-app"
"#,
    );
    let template = Template::load(&path).unwrap();
    let env = DeploymentEnvironment::new("sub", "west");
    let params = template
        .resolve_parameters(&BTreeMap::new(), &env, "root")
        .unwrap();
    assert_eq!(params.get("prefix"), Some(&Value::String("dev-app".into())));
}

#[test]
fn binding_overrides_default() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[parameters.environment]
type = "string"
default = "dev"
"#,
    );
    let template = Template::load(&path).unwrap();
    let env = DeploymentEnvironment::new("sub", "west");
    let mut bindings = BTreeMap::new();
    bindings.insert("environment".to_string(), Value::String("prod".into()));
    let params = template.resolve_parameters(&bindings, &env, "root").unwrap();
    assert_eq!(params.get("environment"), Some(&Value::String("prod".into())));
}

#[test]
fn unbound_parameter_without_default_is_missing() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[parameters.required]
type = "string"
"#,
    );
    let template = Template::load(&path).unwrap();
    let env = DeploymentEnvironment::new("sub", "west");
    let err = template
        .resolve_parameters(&BTreeMap::new(), &env, "root")
        .unwrap_err();
    assert!(matches!(err, StratusError::MissingParameter { .. }));
}

#[test]
fn binding_of_wrong_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[parameters.replicas]
type = "number"
"#,
    );
    let template = Template::load(&path).unwrap();
    let env = DeploymentEnvironment::new("sub", "west");
    let mut bindings = BTreeMap::new();
    bindings.insert("replicas".to_string(), Value::String("three".into()));
    let err = template.resolve_parameters(&bindings, &env, "root").unwrap_err();
    assert!(matches!(err, StratusError::TypeMismatch { .. }));
}

#[test]
fn binding_for_undeclared_parameter_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_template(
        &dir,
        "main.toml",
        r#"
[parameters.location]
type = "string"
default = "west"
"#,
    );
    let template = Template::load(&path).unwrap();
    let env = DeploymentEnvironment::new("sub", "west");
    let mut bindings = BTreeMap::new();
    bindings.insert("locaton".to_string(), Value::String("east".into()));
    let err = template.resolve_parameters(&bindings, &env, "root").unwrap_err();
    assert!(matches!(err, StratusError::UnknownReference { .. }));
}
