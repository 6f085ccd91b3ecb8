//! Deployment environment metadata.
//!
//! The environment carries the target scope, the deployment location, and any
//! extra key-value metadata the caller wants expressions to see through the
//! `environment('key')` built-in. It is part of the per-run context that is
//! passed explicitly to every component; there is no process-wide deployment
//! state.

use std::collections::BTreeMap;

/// Metadata about the deployment target, visible to expressions.
#[derive(Debug, Clone, Default)]
pub struct DeploymentEnvironment {
    /// Target scope identifier (e.g. a subscription or resource-group path).
    pub scope: String,
    /// Target location/region for the deployment.
    pub location: String,
    /// Additional metadata keys exposed to `environment(...)`.
    pub values: BTreeMap<String, String>,
}

impl DeploymentEnvironment {
    /// Create an environment for the given scope and location.
    #[must_use]
    pub fn new(scope: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            scope: scope.into(),
            location: location.into(),
            values: BTreeMap::new(),
        }
    }

    /// Attach an extra metadata key.
    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata key. `scope` and `location` are always present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        match key {
            "scope" => Some(&self.scope),
            "location" => Some(&self.location),
            other => self.values.get(other).map(String::as_str),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_keys_always_present() {
        let env = DeploymentEnvironment::new("sub/prod", "westeurope");
        assert_eq!(env.get("scope"), Some("sub/prod"));
        assert_eq!(env.get("location"), Some("westeurope"));
        assert_eq!(env.get("tenant"), None);
    }

    #[test]
    fn extra_values_are_visible() {
        let env = DeploymentEnvironment::new("s", "l").with_value("tenant", "contoso");
        assert_eq!(env.get("tenant"), Some("contoso"));
    }
}
