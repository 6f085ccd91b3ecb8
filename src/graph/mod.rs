//! Resource graph model.
//!
//! The graph is the in-memory representation of a template scope: resources
//! and modules as nodes (in declaration order), dependency relations as
//! directed edges in a [`petgraph`] store. It is built once at load time and
//! treated as read-only during execution; per-node status lives in the
//! executor, not here.
//!
//! Edges run from dependency to dependent, so a node's in-degree is the
//! number of prerequisites still in front of it - exactly the quantity
//! Kahn's algorithm tracks.

use std::collections::HashMap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::core::{StratusError, suggest_closest};
use crate::template::{ModuleDecl, ResourceDecl, Template};

/// What a graph node holds: a resource or a module with its nested graph.
#[derive(Debug, Clone)]
pub enum NodeBody {
    /// A single provisionable resource.
    Resource(ResourceDecl),
    /// A module instantiation owning a nested graph, only reachable through
    /// this node.
    Module(ModuleNode),
}

/// A module node: the declaration plus its fully built nested graph.
#[derive(Debug, Clone)]
pub struct ModuleNode {
    /// The module declaration (bindings, nested template).
    pub decl: ModuleDecl,
    /// Graph built from the nested template.
    pub graph: DeploymentGraph,
}

/// One node of the deployment graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    /// Symbolic name, unique within the scope.
    pub name: String,
    /// Resource or module payload.
    pub body: NodeBody,
}

impl GraphNode {
    /// Whether this node is a module.
    #[must_use]
    pub const fn is_module(&self) -> bool {
        matches!(self.body, NodeBody::Module(_))
    }
}

/// The dependency graph for one template scope.
#[derive(Debug, Clone, Default)]
pub struct DeploymentGraph {
    scope: String,
    nodes: Vec<GraphNode>,
    index: HashMap<String, usize>,
    edges: DiGraph<usize, ()>,
    petgraph_idx: Vec<NodeIndex>,
}

impl DeploymentGraph {
    /// Create an empty graph for the named scope.
    #[must_use]
    pub fn new(scope: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            ..Self::default()
        }
    }

    /// Build a graph (recursively, including module sub-graphs) from a
    /// loaded template. Adds the explicit edges: `depends_on`, `parent`, and
    /// `scope` targets all precede the declaring resource.
    ///
    /// Implicit expression-derived edges are added afterwards by the
    /// resolver's scan pass; the graph itself never inspects expressions.
    pub fn from_template(template: &Template) -> Result<Self, StratusError> {
        let mut graph = Self::new(template.name.clone());
        for resource in &template.resources {
            graph.add_resource(resource.clone())?;
        }
        for module in &template.modules {
            graph.add_module(module.clone())?;
        }
        for resource in &template.resources {
            for target in resource
                .depends_on
                .iter()
                .chain(&resource.parent)
                .chain(&resource.scope)
            {
                graph.add_dependency(&resource.name, target)?;
            }
        }
        Ok(graph)
    }

    /// Scope name this graph was built for.
    #[must_use]
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Add a resource node. Fails on a symbolic-name collision.
    pub fn add_resource(&mut self, resource: ResourceDecl) -> Result<(), StratusError> {
        self.add_node(GraphNode {
            name: resource.name.clone(),
            body: NodeBody::Resource(resource),
        })
    }

    /// Add a module node, building its nested graph. Fails on a
    /// symbolic-name collision.
    pub fn add_module(&mut self, module: ModuleDecl) -> Result<(), StratusError> {
        let nested = Self::from_template(&module.template)?;
        self.add_node(GraphNode {
            name: module.name.clone(),
            body: NodeBody::Module(ModuleNode {
                decl: module,
                graph: nested,
            }),
        })
    }

    fn add_node(&mut self, node: GraphNode) -> Result<(), StratusError> {
        if self.index.contains_key(&node.name) {
            return Err(StratusError::DuplicateName {
                name: node.name,
                scope: self.scope.clone(),
            });
        }
        let decl_idx = self.nodes.len();
        self.index.insert(node.name.clone(), decl_idx);
        self.petgraph_idx.push(self.edges.add_node(decl_idx));
        self.nodes.push(node);
        Ok(())
    }

    /// Record that `node` depends on `dependency`.
    ///
    /// Duplicate edges collapse; unknown names fail with a did-you-mean
    /// diagnostic.
    pub fn add_dependency(&mut self, node: &str, dependency: &str) -> Result<(), StratusError> {
        let dependent = self.lookup(node)?;
        let prerequisite = self.lookup(dependency)?;
        let from = self.petgraph_idx[prerequisite];
        let to = self.petgraph_idx[dependent];
        if !self.edges.contains_edge(from, to) {
            self.edges.add_edge(from, to, ());
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<usize, StratusError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| StratusError::UnknownReference {
                name: name.to_string(),
                closest: suggest_closest(name, self.index.keys().map(String::as_str)),
            })
    }

    /// Fetch a node by symbolic name.
    #[must_use]
    pub fn get_by_name(&self, name: &str) -> Option<&GraphNode> {
        self.index.get(name).map(|&i| &self.nodes[i])
    }

    /// All nodes in declaration order: a lazy, finite, restartable sequence
    /// (the iterator is `Clone`, so the resolver can make repeated passes).
    pub fn all_nodes(&self) -> impl Iterator<Item = &GraphNode> + Clone {
        self.nodes.iter()
    }

    /// Node at a declaration index.
    #[must_use]
    pub fn node(&self, idx: usize) -> &GraphNode {
        &self.nodes[idx]
    }

    /// Declaration index for a name, if present.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Total node count including every nested module graph.
    #[must_use]
    pub fn total_nodes(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| match &n.body {
                NodeBody::Module(m) => 1 + m.graph.total_nodes(),
                NodeBody::Resource(_) => 1,
            })
            .sum()
    }

    /// Mutable access to a module's nested graph, used by the resolver to
    /// recurse its edge-inference pass.
    pub fn module_graph_mut(&mut self, name: &str) -> Option<&mut Self> {
        let idx = self.index.get(name).copied()?;
        match &mut self.nodes[idx].body {
            NodeBody::Module(module) => Some(&mut module.graph),
            NodeBody::Resource(_) => None,
        }
    }

    /// Declaration indices of the nodes `idx` depends on.
    #[must_use]
    pub fn dependencies(&self, idx: usize) -> Vec<usize> {
        self.edges
            .neighbors_directed(self.petgraph_idx[idx], Direction::Incoming)
            .map(|n| self.edges[n])
            .collect()
    }

    /// Declaration indices of the nodes that depend on `idx`.
    #[must_use]
    pub fn dependents(&self, idx: usize) -> Vec<usize> {
        self.edges
            .neighbors_directed(self.petgraph_idx[idx], Direction::Outgoing)
            .map(|n| self.edges[n])
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

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

    #[test]
    fn duplicate_names_rejected_within_scope() {
        let mut graph = DeploymentGraph::new("root");
        graph.add_resource(resource("a")).unwrap();
        let err = graph.add_resource(resource("a")).unwrap_err();
        assert!(matches!(err, StratusError::DuplicateName { .. }));
    }

    #[test]
    fn all_nodes_is_restartable_and_ordered() {
        let mut graph = DeploymentGraph::new("root");
        graph.add_resource(resource("b")).unwrap();
        graph.add_resource(resource("a")).unwrap();
        let iter = graph.all_nodes();
        let first: Vec<&str> = iter.clone().map(|n| n.name.as_str()).collect();
        let second: Vec<&str> = iter.map(|n| n.name.as_str()).collect();
        // Declaration order, not name order, and the same on every pass.
        assert_eq!(first, vec!["b", "a"]);
        assert_eq!(first, second);
    }

    #[test]
    fn dependencies_and_dependents_are_inverse() {
        let mut graph = DeploymentGraph::new("root");
        graph.add_resource(resource("a")).unwrap();
        graph.add_resource(resource("b")).unwrap();
        graph.add_dependency("b", "a").unwrap();
        assert_eq!(graph.dependencies(graph.index_of("b").unwrap()), vec![0]);
        assert_eq!(graph.dependents(graph.index_of("a").unwrap()), vec![1]);
        assert!(graph.dependencies(0).is_empty());
    }

    #[test]
    fn duplicate_edges_collapse() {
        let mut graph = DeploymentGraph::new("root");
        graph.add_resource(resource("a")).unwrap();
        graph.add_resource(resource("b")).unwrap();
        graph.add_dependency("b", "a").unwrap();
        graph.add_dependency("b", "a").unwrap();
        assert_eq!(graph.dependencies(1).len(), 1);
    }

    #[test]
    fn unknown_dependency_target_suggests() {
        let mut graph = DeploymentGraph::new("root");
        graph.add_resource(resource("storage")).unwrap();
        graph.add_resource(resource("web")).unwrap();
        let err = graph.add_dependency("web", "stroage").unwrap_err();
        match err {
            StratusError::UnknownReference { closest, .. } => {
                assert_eq!(closest.as_deref(), Some("storage"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
