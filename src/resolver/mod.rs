//! Dependency resolution: implicit edge inference and deployment ordering.
//!
//! Two passes, kept strictly apart:
//!
//! 1. [`infer_edges`] - a static-analysis pass that scans every node's raw
//!    property values (module bindings included) for `resources.*` /
//!    `modules.*` references and turns them into explicit graph edges. No
//!    evaluation happens here; it runs on unresolved expressions.
//! 2. [`deployment_order`] - Kahn's algorithm over the completed graph. Ties
//!    between simultaneously eligible nodes break by declaration order, so
//!    the produced order is deterministic across runs with identical input.
//!
//! Cycle detection for the whole deployment (module sub-graphs included)
//! happens in [`validate`], once, before any execution begins: structural
//! errors never produce a partial deployment.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

use tracing::debug;

use crate::core::StratusError;
use crate::expr::collect_references;
use crate::graph::{DeploymentGraph, NodeBody};
use crate::template::Template;

/// Scan raw property values and add one explicit edge per discovered
/// cross-node reference. Recurses into module sub-graphs.
///
/// A reference through the wrong namespace (`resources.x` where `x` is a
/// module, or the reverse) is an author error caught here, at load time.
pub fn infer_edges(graph: &mut DeploymentGraph) -> Result<(), StratusError> {
    let mut edges: Vec<(String, String)> = Vec::new();
    for node in graph.all_nodes() {
        let refs = match &node.body {
            NodeBody::Resource(resource) => {
                let mut refs = std::collections::BTreeSet::new();
                for value in resource.properties.values() {
                    refs.extend(collect_references(value)?);
                }
                refs
            }
            NodeBody::Module(module) => {
                let mut refs = std::collections::BTreeSet::new();
                for value in module.decl.bindings.values() {
                    refs.extend(collect_references(value)?);
                }
                refs
            }
        };
        for node_ref in refs {
            let target = graph.get_by_name(&node_ref.name).ok_or_else(|| {
                StratusError::UnknownReference {
                    name: node_ref.name.clone(),
                    closest: crate::core::suggest_closest(
                        &node_ref.name,
                        graph.all_nodes().map(|n| n.name.as_str()),
                    ),
                }
            })?;
            if target.is_module() != node_ref.is_module {
                let (wrong, right) = if node_ref.is_module {
                    ("modules", "resources")
                } else {
                    ("resources", "modules")
                };
                return Err(StratusError::UnknownReference {
                    name: format!("{wrong}.{}", node_ref.name),
                    closest: Some(format!("{right}.{}", node_ref.name)),
                });
            }
            // A self-reference stays in as a self-loop; Kahn reports it as a
            // one-node cycle.
            edges.push((node.name.clone(), node_ref.name.clone()));
        }
    }
    for (node, dependency) in edges {
        debug!(%node, %dependency, "inferred implicit dependency");
        graph.add_dependency(&node, &dependency)?;
    }

    let module_names: Vec<String> = graph
        .all_nodes()
        .filter(|n| n.is_module())
        .map(|n| n.name.clone())
        .collect();
    for name in module_names {
        if let Some(sub) = graph.module_graph_mut(&name) {
            infer_edges(sub)?;
        }
    }
    Ok(())
}

/// Compute a total deployment order with Kahn's algorithm.
///
/// Every node appears after all of its dependencies; simultaneously eligible
/// nodes come out in declaration order. If nodes remain with unmet
/// prerequisites after exhaustion, the graph has a cycle and the error names
/// every member of one cycle, in path order.
pub fn deployment_order(graph: &DeploymentGraph) -> Result<Vec<usize>, StratusError> {
    let n = graph.len();
    let mut in_degree = vec![0usize; n];
    for idx in 0..n {
        in_degree[idx] = graph.dependencies(idx).len();
    }

    let mut ready: BinaryHeap<Reverse<usize>> = (0..n)
        .filter(|&i| in_degree[i] == 0)
        .map(Reverse)
        .collect();
    let mut order = Vec::with_capacity(n);
    while let Some(Reverse(idx)) = ready.pop() {
        order.push(idx);
        for dependent in graph.dependents(idx) {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push(Reverse(dependent));
            }
        }
    }

    if order.len() < n {
        let remaining: HashSet<usize> = (0..n).filter(|&i| in_degree[i] > 0).collect();
        return Err(StratusError::CyclicDependency {
            members: find_cycle(graph, &remaining),
        });
    }
    Ok(order)
}

/// Walk the residual subgraph to report one concrete cycle path.
///
/// Every node left with nonzero in-degree sits on or behind a cycle; a DFS
/// along dependency edges restricted to that set must close a loop.
fn find_cycle(graph: &DeploymentGraph, remaining: &HashSet<usize>) -> Vec<String> {
    let mut path: Vec<usize> = Vec::new();
    let mut on_path: HashSet<usize> = HashSet::new();
    let mut visited: HashSet<usize> = HashSet::new();

    fn visit(
        graph: &DeploymentGraph,
        remaining: &HashSet<usize>,
        node: usize,
        path: &mut Vec<usize>,
        on_path: &mut HashSet<usize>,
        visited: &mut HashSet<usize>,
    ) -> Option<Vec<usize>> {
        path.push(node);
        on_path.insert(node);
        for dep in graph.dependencies(node) {
            if !remaining.contains(&dep) {
                continue;
            }
            if on_path.contains(&dep) {
                let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(dep);
                return Some(cycle);
            }
            if !visited.contains(&dep)
                && let Some(cycle) = visit(graph, remaining, dep, path, on_path, visited)
            {
                return Some(cycle);
            }
        }
        path.pop();
        on_path.remove(&node);
        visited.insert(node);
        None
    }

    for &start in remaining {
        if visited.contains(&start) {
            continue;
        }
        if let Some(cycle) = visit(graph, remaining, start, &mut path, &mut on_path, &mut visited)
        {
            return cycle.iter().map(|&i| graph.node(i).name.clone()).collect();
        }
    }
    remaining.iter().map(|&i| graph.node(i).name.clone()).collect()
}

/// Full pre-execution validation for a deployment rooted at `template`:
/// build the graph, infer implicit edges, order every scope (root and all
/// module sub-graphs, recursively), and check that output expressions only
/// name nodes that exist. Returns the validated root graph.
pub fn validate(template: &Template) -> Result<DeploymentGraph, StratusError> {
    let mut graph = DeploymentGraph::from_template(template)?;
    infer_edges(&mut graph)?;
    validate_ordering(&graph)?;
    check_output_references(template, &graph)?;
    Ok(graph)
}

fn validate_ordering(graph: &DeploymentGraph) -> Result<(), StratusError> {
    deployment_order(graph)?;
    for node in graph.all_nodes() {
        if let NodeBody::Module(module) = &node.body {
            validate_ordering(&module.graph)?;
        }
    }
    Ok(())
}

fn check_output_references(
    template: &Template,
    graph: &DeploymentGraph,
) -> Result<(), StratusError> {
    for output in &template.outputs {
        for node_ref in collect_references(&output.value)? {
            match graph.get_by_name(&node_ref.name) {
                Some(node) if node.is_module() == node_ref.is_module => {}
                _ => {
                    return Err(StratusError::UnknownReference {
                        name: node_ref.name.clone(),
                        closest: crate::core::suggest_closest(
                            &node_ref.name,
                            graph.all_nodes().map(|n| n.name.as_str()),
                        ),
                    });
                }
            }
        }
    }
    for node in graph.all_nodes() {
        if let NodeBody::Module(module) = &node.body {
            check_output_references(&module.decl.template, &module.graph)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
