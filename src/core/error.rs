//! Error handling for Stratus.
//!
//! The error system is built around two types:
//! - [`StratusError`] - enumerated error types for every failure mode in the
//!   engine, from template loading through deployment execution
//! - [`ErrorContext`] - wrapper that adds user-friendly messages and
//!   actionable suggestions for CLI display
//!
//! # Error Categories
//!
//! - **Structural** (load time, abort before any materialization):
//!   [`StratusError::DuplicateName`], [`StratusError::CyclicDependency`],
//!   [`StratusError::TemplateParse`], [`StratusError::UnknownReference`]
//! - **Author errors** (fatal during resolution, never retried):
//!   [`StratusError::TypeMismatch`], [`StratusError::MissingParameter`]
//! - **Transient, internal**: [`StratusError::UnresolvedReference`] - the
//!   executor treats this as "dependency not ready", not a hard failure
//! - **Provisioning**: transient vs. permanent classification lives on
//!   [`crate::provision::ProvisionError`], as reported by the provider
//!
//! Use [`user_friendly_error`] to convert any error into a displayable format
//! with contextual suggestions.

use colored::Colorize;
use std::fmt;
use thiserror::Error;

/// The main error type for Stratus operations.
///
/// Each variant carries enough context to produce a precise message; the
/// [`ErrorContext`] layer adds resolution suggestions on top.
#[derive(Error, Debug)]
pub enum StratusError {
    /// Two entities share a symbolic name within the same scope.
    ///
    /// Resources and modules occupy a single namespace per template, so a
    /// resource `net` and a module `net` collide even though they live in
    /// different sections.
    #[error("duplicate symbolic name '{name}' in scope '{scope}'")]
    DuplicateName {
        /// The colliding symbolic name.
        name: String,
        /// The template scope the collision occurred in.
        scope: String,
    },

    /// The dependency graph contains a cycle.
    ///
    /// Detected once at the root, across module boundaries, before any
    /// materialization begins. `members` lists every node of at least one
    /// cycle, in path order, with the first node repeated at the end.
    #[error("circular dependency detected: {}", members.join(" -> "))]
    CyclicDependency {
        /// Nodes forming the cycle, in traversal order.
        members: Vec<String>,
    },

    /// A reference to another node's runtime property was evaluated before
    /// that node reached a terminal successful state.
    ///
    /// This is transient by design: with a correctly ordered schedule it
    /// never surfaces, and the executor handles it by returning the node to
    /// the pending set rather than failing the deployment.
    #[error("reference '{reference}' cannot be resolved yet (dependency has not succeeded)")]
    UnresolvedReference {
        /// The reference path that could not be resolved.
        reference: String,
    },

    /// An expression combined incompatible types.
    ///
    /// Author error: fails the owning node immediately, no retry.
    #[error("type mismatch in '{expression}': {message}")]
    TypeMismatch {
        /// The offending expression text.
        expression: String,
        /// What went wrong.
        message: String,
    },

    /// A required parameter has neither a binding nor a declared default.
    ///
    /// Author error: fails the owning node immediately, no retry.
    #[error("missing required parameter '{name}' in scope '{scope}'")]
    MissingParameter {
        /// The parameter name.
        name: String,
        /// The scope (root deployment or module name) missing the value.
        scope: String,
    },

    /// An expression names a parameter, resource, or module that does not
    /// exist in the current scope.
    #[error("unknown reference '{name}'{}", closest.as_ref().map(|c| format!(" (did you mean '{c}'?)")).unwrap_or_default())]
    UnknownReference {
        /// The name that failed to resolve.
        name: String,
        /// Closest declared name by edit distance, if any.
        closest: Option<String>,
    },

    /// An expression could not be parsed.
    #[error("failed to parse expression '{expression}': {message}")]
    ExpressionParse {
        /// The raw expression text.
        expression: String,
        /// Parser diagnostic.
        message: String,
    },

    /// The template file does not exist.
    #[error("template not found: {path}")]
    TemplateNotFound {
        /// Path that was searched.
        path: String,
    },

    /// The template file exists but is not valid.
    #[error("failed to parse template {path}: {reason}")]
    TemplateParse {
        /// Path of the offending template.
        path: String,
        /// Parse diagnostic.
        reason: String,
    },

    /// A module file includes itself, directly or through other modules.
    #[error("module inclusion cycle: {}", chain.join(" -> "))]
    ModuleInclusionCycle {
        /// The chain of template paths forming the cycle.
        chain: Vec<String>,
    },

    /// The deployment was cancelled by an external signal.
    #[error("deployment cancelled")]
    Cancelled,

    /// I/O error wrapper.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StratusError {
    /// Whether this error is a deployment-author mistake.
    ///
    /// Author errors fail the owning node with no retry; they can only be
    /// fixed by editing the template or the supplied parameters.
    #[must_use]
    pub const fn is_author_error(&self) -> bool {
        matches!(
            self,
            Self::TypeMismatch { .. }
                | Self::MissingParameter { .. }
                | Self::UnknownReference { .. }
                | Self::ExpressionParse { .. }
        )
    }

    /// Whether this error means "not ready yet" rather than "failed".
    #[must_use]
    pub const fn is_not_ready(&self) -> bool {
        matches!(self, Self::UnresolvedReference { .. })
    }
}

/// Error with user-friendly context and suggestions.
///
/// Wraps a [`StratusError`] with an optional suggestion and details for
/// display to CLI users. Suggestions are actionable steps; details provide
/// background on why the error occurred.
#[derive(Debug)]
pub struct ErrorContext {
    /// The underlying error.
    pub error: StratusError,
    /// Optional suggestion for resolving the error.
    pub suggestion: Option<String>,
    /// Optional additional details about the error.
    pub details: Option<String>,
}

impl ErrorContext {
    /// Create a new error context with no suggestion or details.
    #[must_use]
    pub const fn new(error: StratusError) -> Self {
        Self {
            error,
            suggestion: None,
            details: None,
        }
    }

    /// Add a suggestion for resolving the error.
    #[must_use]
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Add additional details about the error.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Display the error to stderr with terminal colors.
    pub fn display(&self) {
        eprintln!("{} {}", "Error:".red().bold(), self.error);
        if let Some(ref details) = self.details {
            eprintln!("  {} {}", "Details:".yellow(), details);
        }
        if let Some(ref suggestion) = self.suggestion {
            eprintln!("  {} {}", "Suggestion:".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Error: {}", self.error)?;
        if let Some(ref details) = self.details {
            write!(f, "\n  Details: {details}")?;
        }
        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {suggestion}")?;
        }
        Ok(())
    }
}

/// Convert any error into a user-friendly [`ErrorContext`].
///
/// Downcasts to [`StratusError`] where possible and attaches a suggestion
/// appropriate for the failure mode; other errors pass through with their
/// message intact.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    match error.downcast::<StratusError>() {
        Ok(err) => {
            let suggestion = match &err {
                StratusError::DuplicateName { name, .. } => Some(format!(
                    "Rename one of the entities named '{name}'; resources and modules share a namespace"
                )),
                StratusError::CyclicDependency { .. } => Some(
                    "Break the cycle by removing one of the listed depends_on entries or references"
                        .to_string(),
                ),
                StratusError::MissingParameter { name, .. } => Some(format!(
                    "Pass --param {name}=<value> or declare a default for it in the template"
                )),
                StratusError::UnknownReference {
                    closest: Some(c), ..
                } => Some(format!("Did you mean '{c}'?")),
                StratusError::TemplateNotFound { .. } => Some(
                    "Check the template path; paths are relative to the current directory"
                        .to_string(),
                ),
                StratusError::TypeMismatch { .. } => Some(
                    "String interpolation only accepts strings, numbers, and booleans".to_string(),
                ),
                _ => None,
            };
            let ctx = ErrorContext::new(err);
            match suggestion {
                Some(s) => ctx.with_suggestion(s),
                None => ctx,
            }
        }
        Err(other) => ErrorContext::new(StratusError::TemplateParse {
            path: String::new(),
            reason: format!("{other:#}"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_names_members() {
        let err = StratusError::CyclicDependency {
            members: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "circular dependency detected: a -> b -> a");
    }

    #[test]
    fn unknown_reference_suggests_closest() {
        let err = StratusError::UnknownReference {
            name: "stroage".into(),
            closest: Some("storage".into()),
        };
        assert!(err.to_string().contains("did you mean 'storage'?"));
    }

    #[test]
    fn author_error_classification() {
        assert!(
            StratusError::TypeMismatch {
                expression: "x".into(),
                message: "m".into()
            }
            .is_author_error()
        );
        assert!(
            StratusError::MissingParameter {
                name: "p".into(),
                scope: "root".into()
            }
            .is_author_error()
        );
        assert!(
            !StratusError::UnresolvedReference {
                reference: "resources.a.id".into()
            }
            .is_author_error()
        );
        assert!(
            StratusError::UnresolvedReference {
                reference: "resources.a.id".into()
            }
            .is_not_ready()
        );
    }

    #[test]
    fn error_context_display_includes_suggestion() {
        let ctx = ErrorContext::new(StratusError::TemplateNotFound {
            path: "missing.toml".into(),
        })
        .with_suggestion("Check the path");
        let rendered = format!("{ctx}");
        assert!(rendered.contains("missing.toml"));
        assert!(rendered.contains("Check the path"));
    }
}
