//! The `validate` command: static checks without deployment.

use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde_json::json;

use crate::resolver;
use crate::template::Template;

use super::OutputFormat;

/// Run every static check on a template: loading, structure, parameter and
/// output references, dependency inference, and cycle detection. Exits
/// non-zero on the first failure.
#[derive(Args)]
pub struct ValidateCommand {
    /// Path to the root template file.
    template: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

impl ValidateCommand {
    pub fn execute(self) -> Result<()> {
        let template = Template::load(&self.template)?;
        let graph = resolver::validate(&template)?;

        match self.format {
            OutputFormat::Text => {
                println!(
                    "{} {} ({} nodes, {} at the root)",
                    "Valid:".green().bold(),
                    self.template.display(),
                    graph.total_nodes(),
                    graph.len(),
                );
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({
                        "valid": true,
                        "template": self.template.display().to_string(),
                        "nodes": graph.total_nodes(),
                        "root_nodes": graph.len(),
                    }))?
                );
            }
        }
        Ok(())
    }
}
