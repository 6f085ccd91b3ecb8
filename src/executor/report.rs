//! Deployment result reporting.
//!
//! A deployment always ends with a [`DeploymentReport`], whether it
//! converged, halted on a failure, or was cancelled: already-materialized
//! resources are real and must be accounted for, so runtime failures never
//! abort the process without a per-node accounting.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use colored::Colorize;
use serde_json::json;

use crate::core::StratusError;
use crate::template::value::Value;

/// Lifecycle state of a deployment node.
///
/// `Pending -> Resolving -> Materializing -> Succeeded | Failed`; nodes the
/// scheduler never dispatched before the run halted finish as
/// `NeverAttempted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for all dependencies to succeed.
    Pending,
    /// Dependencies satisfied; property expressions being resolved.
    Resolving,
    /// Resolved payload submitted to the provisioning API.
    Materializing,
    /// Terminal: materialized (possibly as a no-op).
    Succeeded,
    /// Terminal: resolution or materialization failed.
    Failed,
    /// Terminal: the run halted before this node was dispatched.
    NeverAttempted,
}

impl NodeState {
    /// Whether no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::NeverAttempted)
    }

    /// Display name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Resolving => "Resolving",
            Self::Materializing => "Materializing",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::NeverAttempted => "NeverAttempted",
        }
    }
}

/// What kind of node a report line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A provisionable resource.
    Resource,
    /// A module (nested deployment).
    Module,
}

/// Final accounting for one node.
#[derive(Debug, Clone)]
pub struct NodeReport {
    /// Node name; nested module members appear as `module/inner`.
    pub name: String,
    /// Resource or module.
    pub kind: NodeKind,
    /// Terminal state (or `NeverAttempted`).
    pub state: NodeState,
    /// Transient-failure retries performed before the terminal state.
    pub retries: u32,
    /// Whether materialization was an idempotent no-op.
    pub no_op: bool,
    /// Provider-assigned id, when materialization succeeded.
    pub resource_id: Option<String>,
    /// Failure message, when it did not.
    pub error: Option<String>,
    /// Wall-clock time spent materializing.
    pub duration: Option<Duration>,
}

/// Result of a deployment run, partial or complete.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    /// Target scope of the run.
    pub scope: String,
    /// When execution began.
    pub started_at: DateTime<Utc>,
    /// When execution finished draining.
    pub finished_at: DateTime<Utc>,
    /// Per-node accounting in declaration order, module members flattened
    /// beneath their module.
    pub nodes: Vec<NodeReport>,
    /// Root outputs; only populated when every node succeeded.
    pub outputs: BTreeMap<String, Value>,
    /// Whether an external cancellation stopped scheduling.
    pub cancelled: bool,
    /// Scope-level failure outside any single node, such as a root output
    /// expression that could not be evaluated.
    pub error: Option<String>,
}

impl DeploymentReport {
    /// Whether every node reached `Succeeded`, the run was not cancelled,
    /// and no scope-level error (a failing output, say) occurred.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self.cancelled
            && self.error.is_none()
            && self.nodes.iter().all(|n| n.state == NodeState::Succeeded)
    }

    /// Count of nodes in a given state.
    #[must_use]
    pub fn count(&self, state: NodeState) -> usize {
        self.nodes.iter().filter(|n| n.state == state).count()
    }

    /// Render the report for terminal display.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let state = match node.state {
                NodeState::Succeeded if node.no_op => "Succeeded (no-op)".green(),
                NodeState::Succeeded => "Succeeded".green(),
                NodeState::Failed => "Failed".red(),
                NodeState::NeverAttempted => "NeverAttempted".yellow(),
                other => other.as_str().normal(),
            };
            out.push_str(&format!("  {:<40} {}", node.name, state));
            if node.retries > 0 {
                out.push_str(&format!(" ({} retries)", node.retries));
            }
            if let Some(error) = &node.error {
                out.push_str(&format!("\n    {} {}", "error:".red(), error));
            }
            out.push('\n');
        }
        let summary = format!(
            "{} succeeded, {} failed, {} never attempted",
            self.count(NodeState::Succeeded),
            self.count(NodeState::Failed),
            self.count(NodeState::NeverAttempted),
        );
        if self.cancelled {
            out.push_str(&format!("{} {summary}\n", "Cancelled:".yellow().bold()));
        } else if self.succeeded() {
            out.push_str(&format!("{} {summary}\n", "Deployment complete:".green().bold()));
        } else {
            out.push_str(&format!("{} {summary}\n", "Partial deployment:".red().bold()));
        }
        if let Some(error) = &self.error {
            out.push_str(&format!("{} {error}\n", "error:".red()));
        }
        if !self.outputs.is_empty() {
            out.push_str("Outputs:\n");
            for (name, value) in &self.outputs {
                out.push_str(&format!("  {name} = {value}\n"));
            }
        }
        out
    }

    /// Machine-readable form for `--format json`.
    pub fn to_json(&self) -> Result<serde_json::Value, StratusError> {
        let nodes = self
            .nodes
            .iter()
            .map(|n| {
                json!({
                    "name": n.name,
                    "kind": match n.kind {
                        NodeKind::Resource => "resource",
                        NodeKind::Module => "module",
                    },
                    "state": n.state.as_str(),
                    "retries": n.retries,
                    "no_op": n.no_op,
                    "resource_id": n.resource_id,
                    "error": n.error,
                    "duration_ms": n.duration.map(|d| d.as_millis() as u64),
                })
            })
            .collect::<Vec<_>>();
        let mut outputs = serde_json::Map::new();
        for (name, value) in &self.outputs {
            outputs.insert(name.clone(), value.to_json()?);
        }
        Ok(json!({
            "scope": self.scope,
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "succeeded": self.succeeded(),
            "cancelled": self.cancelled,
            "error": self.error,
            "nodes": nodes,
            "outputs": outputs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, state: NodeState) -> NodeReport {
        NodeReport {
            name: name.to_string(),
            kind: NodeKind::Resource,
            state,
            retries: 0,
            no_op: false,
            resource_id: None,
            error: None,
            duration: None,
        }
    }

    fn report(nodes: Vec<NodeReport>) -> DeploymentReport {
        DeploymentReport {
            scope: "sub/dev".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            nodes,
            outputs: BTreeMap::new(),
            cancelled: false,
            error: None,
        }
    }

    #[test]
    fn success_requires_every_node_succeeded() {
        let ok = report(vec![node("a", NodeState::Succeeded)]);
        assert!(ok.succeeded());
        let partial = report(vec![
            node("a", NodeState::Succeeded),
            node("b", NodeState::Failed),
            node("c", NodeState::NeverAttempted),
        ]);
        assert!(!partial.succeeded());
        assert_eq!(partial.count(NodeState::NeverAttempted), 1);
    }

    #[test]
    fn cancelled_run_is_not_a_success() {
        let mut r = report(vec![node("a", NodeState::Succeeded)]);
        r.cancelled = true;
        assert!(!r.succeeded());
    }

    #[test]
    fn scope_error_is_not_a_success() {
        let mut r = report(vec![node("a", NodeState::Succeeded)]);
        r.error = Some("output 'id' failed".to_string());
        assert!(!r.succeeded());
        assert!(r.render().contains("output 'id' failed"));
        assert_eq!(r.to_json().unwrap()["succeeded"], json!(false));
    }

    #[test]
    fn json_shape_is_stable() {
        let r = report(vec![node("a", NodeState::Succeeded)]);
        let json = r.to_json().unwrap();
        assert_eq!(json["succeeded"], json!(true));
        assert_eq!(json["nodes"][0]["state"], json!("Succeeded"));
    }
}
