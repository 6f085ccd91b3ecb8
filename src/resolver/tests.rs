//! Tests for the resolver module.

use super::*;
use crate::graph::DeploymentGraph;
use crate::template::ResourceDecl;
use crate::template::value::Value;
use std::collections::BTreeMap;
use tempfile::TempDir;

fn resource(name: &str) -> ResourceDecl {
    ResourceDecl {
        name: name.to_string(),
        resource_type: "test/unit".to_string(),
        api_version: "2024-01-01".to_string(),
        properties: BTreeMap::new(),
        depends_on: Vec::new(),
        parent: None,
        scope: None,
    }
}

fn resource_with_property(name: &str, key: &str, raw: &str) -> ResourceDecl {
    let mut decl = resource(name);
    decl.properties
        .insert(key.to_string(), Value::Expression(raw.to_string()));
    decl
}

fn graph_of(names: &[&str], edges: &[(&str, &str)]) -> DeploymentGraph {
    let mut graph = DeploymentGraph::new("root");
    for name in names {
        graph.add_resource(resource(name)).unwrap();
    }
    for (node, dep) in edges {
        graph.add_dependency(node, dep).unwrap();
    }
    graph
}

fn assert_topological(graph: &DeploymentGraph, order: &[usize]) {
    let position: std::collections::HashMap<usize, usize> =
        order.iter().enumerate().map(|(pos, &idx)| (idx, pos)).collect();
    for &idx in order {
        for dep in graph.dependencies(idx) {
            assert!(
                position[&dep] < position[&idx],
                "{} must precede {}",
                graph.node(dep).name,
                graph.node(idx).name
            );
        }
    }
}

#[test]
fn order_respects_dependencies() {
    let graph = graph_of(
        &["sql", "vnet", "subnet", "storage"],
        &[("subnet", "vnet"), ("sql", "subnet"), ("sql", "storage")],
    );
    let order = deployment_order(&graph).unwrap();
    assert_eq!(order.len(), 4);
    assert_topological(&graph, &order);
}

#[test]
fn independent_nodes_come_out_in_declaration_order() {
    let graph = graph_of(&["c", "a", "b"], &[]);
    let order = deployment_order(&graph).unwrap();
    // Indices, not names: declaration order is the tie-break.
    assert_eq!(order, vec![0, 1, 2]);
}

#[test]
fn diamond_is_deterministic() {
    // root -> (left, right) -> sink; left declared before right.
    let graph = graph_of(
        &["root", "left", "right", "sink"],
        &[
            ("left", "root"),
            ("right", "root"),
            ("sink", "left"),
            ("sink", "right"),
        ],
    );
    let order = deployment_order(&graph).unwrap();
    assert_eq!(order, vec![0, 1, 2, 3]);
    assert_topological(&graph, &order);
}

#[test]
fn two_node_cycle_reports_both_members() {
    let graph = graph_of(&["a", "b"], &[("a", "b"), ("b", "a")]);
    let err = deployment_order(&graph).unwrap_err();
    match err {
        StratusError::CyclicDependency { members } => {
            assert!(members.contains(&"a".to_string()));
            assert!(members.contains(&"b".to_string()));
            // Path closes on its starting node.
            assert_eq!(members.first(), members.last());
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn three_node_cycle_reports_all_members() {
    let graph = graph_of(&["a", "b", "c"], &[("a", "c"), ("b", "a"), ("c", "b")]);
    let err = deployment_order(&graph).unwrap_err();
    match err {
        StratusError::CyclicDependency { members } => {
            for name in ["a", "b", "c"] {
                assert!(members.contains(&name.to_string()), "missing {name}");
            }
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn self_loop_is_a_cycle() {
    let graph = graph_of(&["a"], &[("a", "a")]);
    assert!(matches!(
        deployment_order(&graph),
        Err(StratusError::CyclicDependency { .. })
    ));
}

#[test]
fn cycle_behind_valid_prefix_is_still_fatal() {
    // "ok" is orderable, but the cycle must fail the whole plan.
    let graph = graph_of(&["ok", "a", "b"], &[("a", "b"), ("b", "a"), ("a", "ok")]);
    let err = deployment_order(&graph).unwrap_err();
    match err {
        StratusError::CyclicDependency { members } => {
            assert!(!members.contains(&"ok".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn implicit_edges_inferred_from_properties() {
    let mut graph = DeploymentGraph::new("root");
    graph.add_resource(resource("vnet")).unwrap();
    graph
        .add_resource(resource_with_property(
            "endpoint",
            "subnet",
            "${resources.vnet.id}/subnets/default",
        ))
        .unwrap();
    infer_edges(&mut graph).unwrap();
    let endpoint = graph.index_of("endpoint").unwrap();
    assert_eq!(
        graph.dependencies(endpoint),
        vec![graph.index_of("vnet").unwrap()]
    );
}

#[test]
fn implicit_reference_to_unknown_node_fails_at_load() {
    let mut graph = DeploymentGraph::new("root");
    graph.add_resource(resource("vnet")).unwrap();
    graph
        .add_resource(resource_with_property(
            "endpoint",
            "subnet",
            "${resources.vnt.id}",
        ))
        .unwrap();
    let err = infer_edges(&mut graph).unwrap_err();
    match err {
        StratusError::UnknownReference { closest, .. } => {
            assert_eq!(closest.as_deref(), Some("vnet"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn implicit_cycle_from_mutual_references() {
    let mut graph = DeploymentGraph::new("root");
    graph
        .add_resource(resource_with_property("a", "peer", "${resources.b.id}"))
        .unwrap();
    graph
        .add_resource(resource_with_property("b", "peer", "${resources.a.id}"))
        .unwrap();
    infer_edges(&mut graph).unwrap();
    assert!(matches!(
        deployment_order(&graph),
        Err(StratusError::CyclicDependency { .. })
    ));
}

#[test]
fn validate_catches_cross_module_cycle_before_execution() {
    // The app resource reads the module's output while the module's binding
    // reads the app's id: a cycle that only exists across the module
    // boundary, caught at the root before anything runs.
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("inner.toml"),
        r#"
[parameters.seed]
type = "string"

[resources.store]
type = "storage/account"
api_version = "1"
properties = { name = "${parameters.seed}" }

[outputs.storeName]
value = "${resources.store.properties.name}"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("main.toml"),
        r#"
[resources.app]
type = "web/app"
api_version = "1"
properties = { store = "${modules.storage.outputs.storeName}" }

[modules.storage]
path = "inner.toml"
parameters = { seed = "${resources.app.id}" }
"#,
    )
    .unwrap();
    let template = crate::template::Template::load(dir.path().join("main.toml")).unwrap();
    let err = validate(&template).unwrap_err();
    match err {
        StratusError::CyclicDependency { members } => {
            assert!(members.contains(&"app".to_string()));
            assert!(members.contains(&"storage".to_string()));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn wrong_namespace_reference_is_an_author_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("inner.toml"),
        r#"
[resources.store]
type = "t"
api_version = "1"
"#,
    )
    .unwrap();
    std::fs::write(
        dir.path().join("main.toml"),
        r#"
[modules.storage]
path = "inner.toml"

[resources.app]
type = "t"
api_version = "1"
properties = { ref = "${resources.storage.id}" }
"#,
    )
    .unwrap();
    let template = crate::template::Template::load(dir.path().join("main.toml")).unwrap();
    let err = validate(&template).unwrap_err();
    match err {
        StratusError::UnknownReference { name, closest } => {
            assert_eq!(name, "resources.storage");
            assert_eq!(closest.as_deref(), Some("modules.storage"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn output_referencing_unknown_node_fails_validation() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("main.toml"),
        r#"
[resources.vnet]
type = "t"
api_version = "1"

[outputs.id]
value = "${resources.vnets.id}"
"#,
    )
    .unwrap();
    let template = crate::template::Template::load(dir.path().join("main.toml")).unwrap();
    let err = validate(&template).unwrap_err();
    assert!(matches!(err, StratusError::UnknownReference { .. }));
}
