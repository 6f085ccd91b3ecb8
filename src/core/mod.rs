//! Core types shared across the engine.
//!
//! Houses the error taxonomy, the per-run deployment environment, and small
//! helpers used by several layers (name suggestions for diagnostics).

pub mod environment;
pub mod error;

pub use environment::DeploymentEnvironment;
pub use error::{ErrorContext, StratusError, user_friendly_error};

/// Find the declared name closest to `input` for did-you-mean diagnostics.
///
/// Returns `None` when nothing is reasonably close (normalized edit
/// similarity below 0.6, the threshold that avoids absurd suggestions on
/// short names).
pub fn suggest_closest<'a, I>(input: &str, candidates: I) -> Option<String>
where
    I: IntoIterator<Item = &'a str>,
{
    candidates
        .into_iter()
        .map(|c| (strsim::jaro_winkler(input, c), c))
        .filter(|(score, _)| *score >= 0.6)
        .max_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, c)| c.to_string())
}
