//! The `deploy` command: resolve a template and materialize it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;

use crate::core::DeploymentEnvironment;
use crate::executor::{CancelSignal, DeployOptions, Executor};
use crate::graph::{DeploymentGraph, NodeBody};
use crate::provision::LocalProvisioner;
use crate::resolver;
use crate::template::Template;
use crate::template::value::Value;

use super::OutputFormat;

/// Deploy a template against a target scope.
#[derive(Args)]
pub struct DeployCommand {
    /// Path to the root template file.
    template: PathBuf,

    /// Target scope identifier (e.g. a subscription or resource-group path).
    #[arg(long)]
    scope: String,

    /// Target location/region.
    #[arg(long, default_value = "local")]
    location: String,

    /// Bind a template parameter, as `name=value`. Repeatable. Values that
    /// parse as integers or booleans are bound with that type.
    #[arg(long = "param", value_name = "NAME=VALUE")]
    params: Vec<String>,

    /// Extra environment metadata visible to `environment(...)`, as
    /// `key=value`. Repeatable.
    #[arg(long = "env-value", value_name = "KEY=VALUE")]
    env_values: Vec<String>,

    /// Maximum concurrently materializing resources.
    #[arg(long, default_value_t = 4)]
    max_parallel: usize,

    /// Retries per resource for transient provisioning failures.
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Path to the provisioned-state file. Without it, state lives in memory
    /// and every run provisions from scratch.
    #[arg(long)]
    state: Option<PathBuf>,

    /// Print the execution plan and exit without materializing anything.
    #[arg(long)]
    dry_run: bool,

    /// Output format for the deployment report.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl DeployCommand {
    pub async fn execute(self, no_progress: bool) -> Result<()> {
        let template = Template::load(&self.template)?;
        let bindings = parse_bindings(&self.params)?;
        let mut env = DeploymentEnvironment::new(&self.scope, &self.location);
        for entry in &self.env_values {
            let (key, value) = split_pair(entry)?;
            env = env.with_value(key, value);
        }

        // The graph is validated here even though the executor validates
        // again: the dry-run plan and the progress bar both need it up front,
        // and a broken template should fail before any state file is opened.
        let graph = resolver::validate(&template)?;
        template.resolve_parameters(&bindings, &env, "root")?;

        if self.dry_run {
            println!("{} {}", "Plan for scope".bold(), self.scope.cyan());
            print_plan(&graph, 1)?;
            return Ok(());
        }

        let provisioner = match &self.state {
            Some(path) => Arc::new(LocalProvisioner::with_state_file(path)?),
            None => Arc::new(LocalProvisioner::in_memory()),
        };

        let cancel = CancelSignal::new();
        let ctrl_c_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nInterrupt received, draining in-flight work...");
                ctrl_c_cancel.cancel();
            }
        });

        let options = DeployOptions {
            max_parallel: self.max_parallel.max(1),
            max_retries: self.retries,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(30),
        };
        debug!(?options, template = %self.template.display(), "starting deploy");

        let mut executor = Executor::new(provisioner, env, options).with_cancel(cancel);
        if !no_progress && self.format == OutputFormat::Text {
            let bar = ProgressBar::new(graph.total_nodes() as u64);
            bar.set_style(
                ProgressStyle::with_template("{bar:30.cyan/dim} {pos}/{len} {msg}")
                    .context("invalid progress template")?,
            );
            executor = executor.with_progress(bar);
        }

        let report = executor.deploy(&template, &bindings).await?;
        match self.format {
            OutputFormat::Text => print!("{}", report.render()),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report.to_json()?)?),
        }

        if report.cancelled {
            bail!("deployment cancelled");
        }
        if !report.succeeded() {
            bail!("deployment finished with failures");
        }
        Ok(())
    }
}

/// Parse repeated `--param name=value` flags into a binding map.
fn parse_bindings(params: &[String]) -> Result<BTreeMap<String, Value>> {
    let mut bindings = BTreeMap::new();
    for entry in params {
        let (name, raw) = split_pair(entry)?;
        bindings.insert(name.to_string(), coerce(raw));
    }
    Ok(bindings)
}

fn split_pair(entry: &str) -> Result<(&str, &str)> {
    entry
        .split_once('=')
        .with_context(|| format!("'{entry}' is not of the form name=value"))
}

/// Untagged CLI values get the narrowest matching type, so `--param count=3`
/// satisfies a `number` parameter.
fn coerce(raw: &str) -> Value {
    if let Ok(n) = raw.parse::<i64>() {
        Value::Number(n)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::String(raw.to_string())
    }
}

/// Print the deployment order for a graph, recursing into modules.
fn print_plan(graph: &DeploymentGraph, depth: usize) -> Result<()> {
    let indent = "  ".repeat(depth);
    for idx in resolver::deployment_order(graph)? {
        let node = graph.node(idx);
        let mut deps: Vec<&str> = graph
            .dependencies(idx)
            .into_iter()
            .map(|d| graph.node(d).name.as_str())
            .collect();
        deps.sort_unstable();
        let after = if deps.is_empty() {
            String::new()
        } else {
            format!(" (after {})", deps.join(", "))
        };
        match &node.body {
            NodeBody::Resource(resource) => {
                println!(
                    "{indent}{} {}{after}",
                    node.name.bold(),
                    resource.resource_type.dimmed()
                );
            }
            NodeBody::Module(module) => {
                println!("{indent}{} {}{after}", node.name.bold(), "module".cyan());
                print_plan(&module.graph, depth + 1)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerces_cli_values_to_the_narrowest_type() {
        assert_eq!(coerce("3"), Value::Number(3));
        assert_eq!(coerce("-7"), Value::Number(-7));
        assert_eq!(coerce("true"), Value::Bool(true));
        assert_eq!(coerce("dev"), Value::String("dev".to_string()));
        // Not a bare i64, stays a string.
        assert_eq!(coerce("3.5"), Value::String("3.5".to_string()));
    }

    #[test]
    fn rejects_malformed_param_flags() {
        assert!(parse_bindings(&["novalue".to_string()]).is_err());
        let bound = parse_bindings(&["a=1".to_string(), "b=x=y".to_string()]).unwrap();
        assert_eq!(bound["a"], Value::Number(1));
        // First '=' splits; the rest is the value.
        assert_eq!(bound["b"], Value::String("x=y".to_string()));
    }
}
