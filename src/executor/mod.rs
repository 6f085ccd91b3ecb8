//! Deployment executor: drives the resource graph to a converged state.
//!
//! The executor walks the validated graph readiness-first: a node becomes
//! eligible when every dependency has succeeded, eligible nodes are
//! dispatched in declaration order (the same deterministic tie-break the
//! resolver uses), and materializations run concurrently under a semaphore
//! bounded by [`DeployOptions::max_parallel`]. Per-node lifecycle:
//!
//! ```text
//! Pending -> Resolving -> Materializing -> Succeeded | Failed
//! ```
//!
//! Resolution is synchronous computation; only materialization suspends on
//! I/O. Author errors during resolution (type mismatches, missing
//! parameters) fail the node immediately; transient provisioning failures
//! retry with exponential backoff up to a configured bound; permanent
//! rejections do not retry. The first node to fail terminally halts
//! scheduling, in-flight work drains, and the run ends in a partial report.
//! Nothing is rolled back: materialization is diff-based create-or-update,
//! so re-running the same graph converges instead of duplicating.
//!
//! Modules are nodes whose materialization runs a nested executor pass over
//! their own graph with an explicitly bound parameter namespace. A module
//! holds no semaphore permit of its own - its inner resources acquire
//! permits individually, which keeps `max_parallel = 1` deadlock-free.

pub mod report;

pub use report::{DeploymentReport, NodeKind, NodeReport, NodeState};

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::ProgressBar;
use tokio::sync::Semaphore;
use tokio_retry::RetryIf;
use tokio_retry::strategy::ExponentialBackoff;
use tracing::{debug, info, warn};

use crate::core::{DeploymentEnvironment, StratusError, suggest_closest};
use crate::expr::{EvalContext, StateView, eval::traverse};
use crate::graph::{DeploymentGraph, ModuleNode, NodeBody};
use crate::provision::{ProvisionError, ProvisionRequest, Provisioner};
use crate::template::value::Value;
use crate::template::{ResourceDecl, Template};

/// Tunables for a deployment run.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Maximum concurrently materializing resources.
    pub max_parallel: usize,
    /// Retries allowed per node for transient provisioning failures.
    pub max_retries: u32,
    /// Initial backoff delay; doubles per retry.
    pub retry_base_delay: Duration,
    /// Backoff ceiling.
    pub retry_max_delay: Duration,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(50),
            retry_max_delay: Duration::from_secs(2),
        }
    }
}

/// Cooperative cancellation flag shared with the caller.
///
/// Cancelling stops the scheduling of new nodes; in-flight materializations
/// run to completion, since a provisioning call generally cannot be aborted
/// cleanly once accepted.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    /// New, un-cancelled signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of executing one scope (the root deployment or one module).
struct ScopeOutcome {
    reports: Vec<NodeReport>,
    outputs: BTreeMap<String, Value>,
    success: bool,
    cancelled: bool,
    error: Option<String>,
}

enum Resolved {
    Resource(ProvisionRequest),
    Module(BTreeMap<String, Value>),
}

enum TaskDone {
    Resource {
        idx: usize,
        result: Result<ResourceSuccess, ResourceFailure>,
    },
    Module {
        idx: usize,
        outcome: ScopeOutcome,
        duration: Duration,
    },
    /// Cancellation landed between dispatch and the first API call.
    NotStarted { idx: usize },
}

struct ResourceSuccess {
    resource_id: String,
    properties: Value,
    no_op: bool,
    retries: u32,
    duration: Duration,
}

struct ResourceFailure {
    error: String,
    retries: u32,
    duration: Duration,
}

/// Read-only view of a scope's execution state, handed to the evaluator.
///
/// References to nodes that have not reached `Succeeded` come back as
/// [`StratusError::UnresolvedReference`]; the scheduler treats that as "not
/// ready", never as a failure.
struct ScopeView<'a> {
    graph: &'a DeploymentGraph,
    statuses: &'a DashMap<usize, NodeState>,
    resource_props: &'a HashMap<String, Value>,
    module_outputs: &'a HashMap<String, BTreeMap<String, Value>>,
}

impl ScopeView<'_> {
    fn state_of(&self, idx: usize) -> NodeState {
        self.statuses.get(&idx).map_or(NodeState::Pending, |s| *s)
    }
}

impl StateView for ScopeView<'_> {
    fn resource_value(
        &self,
        name: &str,
        path: &[String],
        reference: &str,
    ) -> Result<Value, StratusError> {
        let Some(idx) = self.graph.index_of(name) else {
            return Err(StratusError::UnknownReference {
                name: reference.to_string(),
                closest: suggest_closest(name, self.graph.all_nodes().map(|n| n.name.as_str())),
            });
        };
        if self.graph.node(idx).is_module() {
            return Err(StratusError::UnknownReference {
                name: format!("resources.{name}"),
                closest: Some(format!("modules.{name}")),
            });
        }
        if self.state_of(idx) != NodeState::Succeeded {
            return Err(StratusError::UnresolvedReference {
                reference: reference.to_string(),
            });
        }
        let props = self
            .resource_props
            .get(name)
            .ok_or_else(|| StratusError::UnresolvedReference {
                reference: reference.to_string(),
            })?;
        // `resources.x.id` and `resources.x.properties.y` both read the
        // runtime property bag returned by the provisioner.
        let effective = if path.first().map(String::as_str) == Some("properties") {
            &path[1..]
        } else {
            path
        };
        traverse(props, effective, reference)
    }

    fn module_output(
        &self,
        name: &str,
        path: &[String],
        reference: &str,
    ) -> Result<Value, StratusError> {
        let Some(idx) = self.graph.index_of(name) else {
            return Err(StratusError::UnknownReference {
                name: reference.to_string(),
                closest: suggest_closest(name, self.graph.all_nodes().map(|n| n.name.as_str())),
            });
        };
        if !self.graph.node(idx).is_module() {
            return Err(StratusError::UnknownReference {
                name: format!("modules.{name}"),
                closest: Some(format!("resources.{name}")),
            });
        }
        let Some(outputs) = self.module_outputs.get(name) else {
            return Err(StratusError::UnresolvedReference {
                reference: reference.to_string(),
            });
        };
        let output = outputs.get(&path[0]).ok_or_else(|| StratusError::UnknownReference {
            name: reference.to_string(),
            closest: suggest_closest(&path[0], outputs.keys().map(String::as_str)),
        })?;
        traverse(output, &path[1..], reference)
    }
}

/// The deployment executor. One instance drives one run, root and nested
/// module scopes alike; all state is per-run, nothing process-wide.
pub struct Executor {
    provisioner: Arc<dyn Provisioner>,
    env: DeploymentEnvironment,
    options: DeployOptions,
    cancel: CancelSignal,
    progress: Option<ProgressBar>,
    // One pool for the whole run; nested module scopes share it, so
    // `max_parallel` bounds concurrent materializations across every scope.
    semaphore: Arc<Semaphore>,
}

impl Executor {
    /// Create an executor for the given provisioner and target environment.
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        env: DeploymentEnvironment,
        options: DeployOptions,
    ) -> Self {
        let semaphore = Arc::new(Semaphore::new(options.max_parallel.max(1)));
        Self {
            provisioner,
            env,
            options,
            cancel: CancelSignal::new(),
            progress: None,
            semaphore,
        }
    }

    /// Attach an external cancellation signal.
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Attach a progress bar, ticked once per node reaching a terminal
    /// state (nested module members included).
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Validate and execute a deployment for `template`.
    ///
    /// Structural errors (duplicate names, cycles, unknown references,
    /// unresolvable root parameters) return `Err` before any
    /// materialization; once execution starts, failures are reported in the
    /// returned [`DeploymentReport`] instead.
    pub async fn deploy(
        &self,
        template: &Template,
        bindings: &BTreeMap<String, Value>,
    ) -> Result<DeploymentReport, StratusError> {
        let graph = crate::resolver::validate(template)?;
        // Root parameters must resolve before anything runs; module
        // parameters bind at instantiation time instead.
        template.resolve_parameters(bindings, &self.env, "root")?;

        info!(scope = %self.env.scope, nodes = graph.len(), "starting deployment");
        let started_at = Utc::now();
        let outcome = self
            .run_scope(&graph, template, bindings.clone(), "root".to_string())
            .await;
        Ok(DeploymentReport {
            scope: self.env.scope.clone(),
            started_at,
            finished_at: Utc::now(),
            nodes: outcome.reports,
            outputs: outcome.outputs,
            cancelled: outcome.cancelled,
            error: outcome.error,
        })
    }

    fn run_scope<'a>(
        &'a self,
        graph: &'a DeploymentGraph,
        template: &'a Template,
        bindings: BTreeMap<String, Value>,
        label: String,
    ) -> BoxFuture<'a, ScopeOutcome> {
        async move {
            let n = graph.len();
            let params = match template.resolve_parameters(&bindings, &self.env, &label) {
                Ok(params) => params,
                Err(err) => {
                    return ScopeOutcome {
                        reports: never_attempted_reports(graph),
                        outputs: BTreeMap::new(),
                        success: false,
                        cancelled: false,
                        error: Some(err.to_string()),
                    };
                }
            };

            let statuses: DashMap<usize, NodeState> =
                (0..n).map(|i| (i, NodeState::Pending)).collect();
            let mut resource_props: HashMap<String, Value> = HashMap::new();
            let mut module_outputs: HashMap<String, BTreeMap<String, Value>> = HashMap::new();
            let mut reports: Vec<Option<NodeReport>> = (0..n).map(|_| None).collect();
            let mut nested_reports: HashMap<usize, Vec<NodeReport>> = HashMap::new();
            let mut inflight: FuturesUnordered<BoxFuture<'_, TaskDone>> = FuturesUnordered::new();
            let mut halted = false;
            let mut cancelled = false;
            let mut scope_error: Option<String> = None;

            loop {
                if self.cancel.is_cancelled() {
                    cancelled = true;
                }
                if !halted && !cancelled {
                    for idx in 0..n {
                        if statuses.get(&idx).map(|s| *s) != Some(NodeState::Pending) {
                            continue;
                        }
                        let deps_ready = graph.dependencies(idx).into_iter().all(|dep| {
                            statuses.get(&dep).map(|s| *s) == Some(NodeState::Succeeded)
                        });
                        let deps_failed = graph.dependencies(idx).into_iter().any(|dep| {
                            matches!(
                                statuses.get(&dep).map(|s| *s),
                                Some(NodeState::Failed | NodeState::NeverAttempted)
                            )
                        });
                        if deps_failed || !deps_ready {
                            continue;
                        }
                        statuses.insert(idx, NodeState::Resolving);
                        let view = ScopeView {
                            graph,
                            statuses: &statuses,
                            resource_props: &resource_props,
                            module_outputs: &module_outputs,
                        };
                        let ctx = EvalContext {
                            scope: &label,
                            params: &params,
                            env: &self.env,
                            state: &view,
                        };
                        let node = graph.node(idx);
                        match resolve_node(node, &ctx, &self.env) {
                            Ok(Resolved::Resource(request)) => {
                                debug!(node = %node.name, scope = %label, "dispatching resource");
                                inflight.push(
                                    self.materialize_resource(idx, request, &statuses).boxed(),
                                );
                            }
                            Ok(Resolved::Module(bound)) => {
                                let NodeBody::Module(module) = &node.body else {
                                    unreachable!("resolve_node only returns Module for modules");
                                };
                                debug!(module = %node.name, scope = %label, "instantiating module");
                                inflight.push(
                                    self.materialize_module(idx, module, bound, &statuses).boxed(),
                                );
                            }
                            Err(err) if err.is_not_ready() => {
                                // Dependency state not visible yet; re-attempt
                                // once more of the graph has resolved.
                                statuses.insert(idx, NodeState::Pending);
                            }
                            Err(err) => {
                                warn!(node = %node.name, error = %err, "resolution failed");
                                statuses.insert(idx, NodeState::Failed);
                                reports[idx] = Some(failed_report(node_name_kind(graph, idx), err));
                                halted = true;
                                self.tick();
                                // Nothing eligible later in the pass may start
                                // once the run is halting.
                                break;
                            }
                        }
                    }
                }

                let Some(done) = inflight.next().await else {
                    break;
                };
                match done {
                    TaskDone::Resource { idx, result } => {
                        let (name, kind) = node_name_kind(graph, idx);
                        match result {
                            Ok(success) => {
                                statuses.insert(idx, NodeState::Succeeded);
                                resource_props.insert(name.clone(), success.properties.clone());
                                reports[idx] = Some(NodeReport {
                                    name,
                                    kind,
                                    state: NodeState::Succeeded,
                                    retries: success.retries,
                                    no_op: success.no_op,
                                    resource_id: Some(success.resource_id),
                                    error: None,
                                    duration: Some(success.duration),
                                });
                            }
                            Err(failure) => {
                                statuses.insert(idx, NodeState::Failed);
                                reports[idx] = Some(NodeReport {
                                    name,
                                    kind,
                                    state: NodeState::Failed,
                                    retries: failure.retries,
                                    no_op: false,
                                    resource_id: None,
                                    error: Some(failure.error),
                                    duration: Some(failure.duration),
                                });
                                halted = true;
                            }
                        }
                        self.tick();
                    }
                    TaskDone::Module {
                        idx,
                        outcome,
                        duration,
                    } => {
                        let (name, kind) = node_name_kind(graph, idx);
                        if outcome.cancelled {
                            cancelled = true;
                        }
                        let no_op = outcome.success
                            && outcome
                                .reports
                                .iter()
                                .all(|r| r.no_op || r.kind == NodeKind::Module);
                        if outcome.success {
                            statuses.insert(idx, NodeState::Succeeded);
                            module_outputs.insert(name.clone(), outcome.outputs);
                            reports[idx] = Some(NodeReport {
                                name: name.clone(),
                                kind,
                                state: NodeState::Succeeded,
                                retries: 0,
                                no_op,
                                resource_id: None,
                                error: None,
                                duration: Some(duration),
                            });
                        } else {
                            statuses.insert(idx, NodeState::Failed);
                            reports[idx] = Some(NodeReport {
                                name: name.clone(),
                                kind,
                                state: NodeState::Failed,
                                retries: 0,
                                no_op: false,
                                resource_id: None,
                                error: outcome.error.clone().or_else(|| {
                                    outcome
                                        .reports
                                        .iter()
                                        .find_map(|r| r.error.clone())
                                }),
                                duration: Some(duration),
                            });
                            halted = true;
                        }
                        // Surface the nested accounting under the module's
                        // name so the report stays flat.
                        nested_reports.insert(
                            idx,
                            outcome
                                .reports
                                .into_iter()
                                .map(|mut r| {
                                    r.name = format!("{name}/{}", r.name);
                                    r
                                })
                                .collect(),
                        );
                        self.tick();
                    }
                    TaskDone::NotStarted { idx } => {
                        statuses.insert(idx, NodeState::Pending);
                    }
                }
            }

            // Drained: anything not terminal was never attempted. Nested
            // module reports slot in right after their module's own line.
            let mut final_reports = Vec::with_capacity(reports.len());
            for (idx, slot) in reports.into_iter().enumerate() {
                match slot {
                    Some(report) => final_reports.push(report),
                    None => {
                        let (name, kind) = node_name_kind(graph, idx);
                        statuses.insert(idx, NodeState::NeverAttempted);
                        final_reports.push(NodeReport {
                            name,
                            kind,
                            state: NodeState::NeverAttempted,
                            retries: 0,
                            no_op: false,
                            resource_id: None,
                            error: None,
                            duration: None,
                        });
                        self.tick();
                    }
                }
                if let Some(nested) = nested_reports.remove(&idx) {
                    final_reports.extend(nested);
                }
            }

            let all_succeeded = (0..n)
                .all(|idx| statuses.get(&idx).map(|s| *s) == Some(NodeState::Succeeded));
            let mut outputs = BTreeMap::new();
            if all_succeeded && !cancelled {
                let view = ScopeView {
                    graph,
                    statuses: &statuses,
                    resource_props: &resource_props,
                    module_outputs: &module_outputs,
                };
                let ctx = EvalContext {
                    scope: &label,
                    params: &params,
                    env: &self.env,
                    state: &view,
                };
                for output in &template.outputs {
                    match ctx.evaluate_value(&output.value) {
                        Ok(value) => {
                            outputs.insert(output.name.clone(), value);
                        }
                        Err(err) => {
                            scope_error =
                                Some(format!("output '{}' failed: {err}", output.name));
                            break;
                        }
                    }
                }
            }

            let success = all_succeeded && !cancelled && scope_error.is_none();
            ScopeOutcome {
                reports: final_reports,
                outputs,
                success,
                cancelled,
                error: scope_error,
            }
        }
        .boxed()
    }

    async fn materialize_resource(
        &self,
        idx: usize,
        request: ProvisionRequest,
        statuses: &DashMap<usize, NodeState>,
    ) -> TaskDone {
        let Ok(_permit) = self.semaphore.clone().acquire_owned().await else {
            return TaskDone::NotStarted { idx };
        };
        if self.cancel.is_cancelled() {
            return TaskDone::NotStarted { idx };
        }
        statuses.insert(idx, NodeState::Materializing);

        let started = Instant::now();
        let attempts = Arc::new(AtomicU32::new(0));
        let strategy = backoff_schedule(&self.options);

        let provisioner = self.provisioner.clone();
        let name = request.name.clone();
        let attempts_counter = attempts.clone();
        let result = RetryIf::spawn(
            strategy,
            move || {
                let provisioner = provisioner.clone();
                let request = request.clone();
                let attempt = attempts_counter.fetch_add(1, Ordering::SeqCst) + 1;
                if attempt > 1 {
                    debug!(resource = %request.name, attempt, "retrying after transient failure");
                }
                async move { provisioner.create_or_update(request).await }
            },
            |err: &ProvisionError| err.is_transient(),
        )
        .await;

        let retries = attempts.load(Ordering::SeqCst).saturating_sub(1);
        let duration = started.elapsed();
        let result = match result {
            Ok(outcome) => {
                debug!(resource = %name, no_op = outcome.no_op, retries, "materialized");
                Ok(ResourceSuccess {
                    resource_id: outcome.resource_id,
                    properties: Value::from_json(&outcome.properties),
                    no_op: outcome.no_op,
                    retries,
                    duration,
                })
            }
            Err(err) => {
                warn!(resource = %name, error = %err, retries, "materialization failed");
                Err(ResourceFailure {
                    error: err.to_string(),
                    retries,
                    duration,
                })
            }
        };
        TaskDone::Resource { idx, result }
    }

    async fn materialize_module(
        &self,
        idx: usize,
        module: &ModuleNode,
        bindings: BTreeMap<String, Value>,
        statuses: &DashMap<usize, NodeState>,
    ) -> TaskDone {
        if self.cancel.is_cancelled() {
            return TaskDone::NotStarted { idx };
        }
        statuses.insert(idx, NodeState::Materializing);
        let started = Instant::now();
        let outcome = self
            .run_scope(
                &module.graph,
                &module.decl.template,
                bindings,
                module.decl.name.clone(),
            )
            .await;
        TaskDone::Module {
            idx,
            outcome,
            duration: started.elapsed(),
        }
    }

    fn tick(&self) {
        if let Some(progress) = &self.progress {
            progress.inc(1);
        }
    }
}

/// Delay schedule for transient provisioning failures: `retry_base_delay`
/// first, doubling each retry, capped at `retry_max_delay`, `max_retries`
/// entries long.
fn backoff_schedule(options: &DeployOptions) -> impl Iterator<Item = Duration> {
    // tokio-retry's `from_millis` argument is the exponent base, not the
    // first delay. A base of 2 with the configured delay folded into the
    // factor yields base_delay, 2*base_delay, 4*base_delay, ...
    let factor = (options.retry_base_delay.as_millis() as u64 / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(options.retry_max_delay)
        .take(options.max_retries as usize)
}

fn node_name_kind(graph: &DeploymentGraph, idx: usize) -> (String, NodeKind) {
    let node = graph.node(idx);
    let kind = if node.is_module() {
        NodeKind::Module
    } else {
        NodeKind::Resource
    };
    (node.name.clone(), kind)
}

fn failed_report((name, kind): (String, NodeKind), err: StratusError) -> NodeReport {
    NodeReport {
        name,
        kind,
        state: NodeState::Failed,
        retries: 0,
        no_op: false,
        resource_id: None,
        error: Some(err.to_string()),
        duration: None,
    }
}

fn never_attempted_reports(graph: &DeploymentGraph) -> Vec<NodeReport> {
    (0..graph.len())
        .map(|idx| {
            let (name, kind) = node_name_kind(graph, idx);
            NodeReport {
                name,
                kind,
                state: NodeState::NeverAttempted,
                retries: 0,
                no_op: false,
                resource_id: None,
                error: None,
                duration: None,
            }
        })
        .collect()
}

/// Resolve one node's expressions into a provisioning request (resources) or
/// a bound parameter map (modules).
fn resolve_node(
    node: &crate::graph::GraphNode,
    ctx: &EvalContext<'_>,
    env: &DeploymentEnvironment,
) -> Result<Resolved, StratusError> {
    match &node.body {
        NodeBody::Resource(resource) => {
            let request = resolve_resource(resource, ctx, env)?;
            Ok(Resolved::Resource(request))
        }
        NodeBody::Module(module) => {
            let mut bound = BTreeMap::new();
            for (key, value) in &module.decl.bindings {
                bound.insert(key.clone(), ctx.evaluate_value(value)?);
            }
            Ok(Resolved::Module(bound))
        }
    }
}

fn resolve_resource(
    resource: &ResourceDecl,
    ctx: &EvalContext<'_>,
    env: &DeploymentEnvironment,
) -> Result<ProvisionRequest, StratusError> {
    let mut payload = serde_json::Map::new();
    for (key, value) in &resource.properties {
        payload.insert(key.clone(), ctx.evaluate_value(value)?.to_json()?);
    }

    // A resource created inside another resource (scope or parent) uses that
    // resource's id as its effective scope; the dependency edge guarantees
    // the target has already succeeded.
    let container = resource.scope.as_ref().or(resource.parent.as_ref());
    let scope = match container {
        Some(target) => {
            let id = ctx.state.resource_value(
                target,
                &["id".to_string()],
                &format!("resources.{target}.id"),
            )?;
            id.to_scalar_string(&format!("resources.{target}.id"))?
        }
        None => env.scope.clone(),
    };

    Ok(ProvisionRequest {
        name: resource.name.clone(),
        resource_type: resource.resource_type.clone(),
        api_version: resource.api_version.clone(),
        scope,
        payload: serde_json::Value::Object(payload),
    })
}
