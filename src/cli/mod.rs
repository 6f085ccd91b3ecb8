//! Command-line interface for Stratus.
//!
//! Each command lives in its own module with its own argument structure and
//! execution logic:
//!
//! - `deploy` - resolve a template and materialize it against a target scope
//! - `validate` - load a template and run every static check without
//!   materializing anything
//!
//! # Examples
//!
//! ```bash
//! # Validate a template
//! stratus validate infra/main.toml
//!
//! # Deploy to a scope, persisting provisioned state between runs
//! stratus deploy infra/main.toml --scope sub/dev --location westeurope \
//!     --param environment=dev --state .stratus/state.json
//!
//! # Preview the execution plan without touching anything
//! stratus deploy infra/main.toml --scope sub/dev --dry-run
//! ```

mod deploy;
mod validate;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable, colored terminal output.
    Text,
    /// Machine-readable JSON on stdout.
    Json,
}

/// Top-level CLI definition.
///
/// Global options apply to every subcommand; mutually exclusive flags are
/// validated by clap itself.
#[derive(Parser)]
#[command(
    name = "stratus",
    about = "Declarative resource deployment engine",
    version,
    long_about = "Stratus resolves declarative resource templates into a dependency \
                  graph and materializes them against a target scope, in parallel \
                  where the graph allows it."
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable debug-level logging (equivalent to RUST_LOG=debug).
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Suppress everything except errors and requested output.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Disable progress bars (automatically off for JSON output).
    #[arg(long, global = true)]
    no_progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Deploy a template against a target scope.
    Deploy(deploy::DeployCommand),

    /// Run every static check on a template without deploying.
    Validate(validate::ValidateCommand),
}

impl Cli {
    /// Log filter directive derived from the verbosity flags, or `None` when
    /// the environment's own `RUST_LOG` should win.
    #[must_use]
    pub fn log_directive(&self) -> Option<&'static str> {
        if self.verbose {
            Some("stratus=debug")
        } else if self.quiet {
            Some("off")
        } else {
            None
        }
    }

    /// Dispatch to the selected subcommand.
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Deploy(cmd) => cmd.execute(self.no_progress).await,
            Commands::Validate(cmd) => cmd.execute(),
        }
    }
}
