//! Provisioning API boundary.
//!
//! The engine never talks to a cloud directly; it hands fully resolved
//! payloads to a [`Provisioner`] and consumes the classified result. The
//! contract mirrors real provisioning APIs:
//!
//! - `create_or_update` is idempotent: submitting a payload that matches the
//!   remote state is a no-op success, reported through
//!   [`ProvisionOutcome::no_op`].
//! - Errors arrive pre-classified as transient (worth retrying with backoff)
//!   or permanent (a semantic rejection; retrying cannot help).
//!
//! Two implementations ship with the crate: [`LocalProvisioner`] keeps
//! remote state in a JSON file so repeated CLI runs converge, and the
//! test-only [`MockProvisioner`] scripts failures and delays for the
//! executor test-bed.

pub mod local;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use local::LocalProvisioner;
#[cfg(any(test, feature = "test-utils"))]
pub use mock::{MockProvisioner, MockResponse};

use async_trait::async_trait;
use thiserror::Error;

/// A fully resolved resource definition, ready to submit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionRequest {
    /// Symbolic name within the deployment (diagnostics and state keys).
    pub name: String,
    /// Resource-type identifier, opaque to the engine.
    pub resource_type: String,
    /// API version string passed through verbatim.
    pub api_version: String,
    /// Scope the resource is created within.
    pub scope: String,
    /// Resolved property payload; contains no unresolved expressions.
    pub payload: serde_json::Value,
}

/// Terminal result of a successful create-or-update call.
#[derive(Debug, Clone)]
pub struct ProvisionOutcome {
    /// Provider-assigned resource identifier.
    pub resource_id: String,
    /// Runtime properties of the materialized resource, including any
    /// provider-assigned values that did not exist in the request payload.
    pub properties: serde_json::Value,
    /// True when the remote state already matched the payload and nothing
    /// was changed.
    pub no_op: bool,
}

/// Provisioning failure, classified by the provider.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    /// Worth retrying: rate limiting, transient network failure.
    #[error("transient provisioning failure: {0}")]
    Transient(String),
    /// Semantic rejection: retrying the same payload cannot succeed.
    #[error("permanent provisioning failure: {0}")]
    Permanent(String),
}

impl ProvisionError {
    /// Whether the executor should retry this failure.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// External provisioning API. Implementations must be safe to call
/// concurrently; the executor dispatches up to `max_parallel` requests at a
/// time.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Create the resource or update it in place, converging remote state on
    /// the payload. Must be idempotent.
    async fn create_or_update(
        &self,
        request: ProvisionRequest,
    ) -> Result<ProvisionOutcome, ProvisionError>;
}
