//! Local state-file provisioner.
//!
//! Simulates a create-or-update provisioning API against a JSON state file,
//! which is what makes repeated CLI runs against the same target converge:
//! a payload identical to the stored one is reported as a no-op success.
//! State is written atomically (temp file + rename) so a crash never leaves
//! a half-written file behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

use super::{ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct StoredResource {
    resource_type: String,
    api_version: String,
    payload: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    resources: BTreeMap<String, StoredResource>,
}

/// Provisioner backed by a JSON state file (or pure memory when no path is
/// given).
pub struct LocalProvisioner {
    path: Option<PathBuf>,
    state: Mutex<StateFile>,
}

impl LocalProvisioner {
    /// In-memory provisioner; state is dropped with the value.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(StateFile::default()),
        }
    }

    /// Provisioner persisting to `path`. An existing state file is loaded;
    /// a missing one starts empty.
    pub fn with_state_file(path: impl Into<PathBuf>) -> Result<Self, ProvisionError> {
        let path = path.into();
        let state = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ProvisionError::Permanent(format!("cannot read state file: {e}")))?;
            serde_json::from_str(&text)
                .map_err(|e| ProvisionError::Permanent(format!("corrupt state file: {e}")))?
        } else {
            StateFile::default()
        };
        Ok(Self {
            path: Some(path),
            state: Mutex::new(state),
        })
    }

    fn persist(&self, state: &StateFile) -> Result<(), ProvisionError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = dir {
            std::fs::create_dir_all(dir)
                .map_err(|e| ProvisionError::Transient(format!("cannot create state dir: {e}")))?;
        }
        let text = serde_json::to_string_pretty(state)
            .map_err(|e| ProvisionError::Permanent(format!("cannot serialize state: {e}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir.unwrap_or(std::path::Path::new(".")))
            .map_err(|e| ProvisionError::Transient(format!("cannot stage state file: {e}")))?;
        tmp.write_all(text.as_bytes())
            .map_err(|e| ProvisionError::Transient(format!("cannot write state file: {e}")))?;
        tmp.persist(path)
            .map_err(|e| ProvisionError::Transient(format!("cannot persist state file: {e}")))?;
        Ok(())
    }
}

fn resource_id(request: &ProvisionRequest) -> String {
    format!(
        "{}/{}/{}",
        request.scope, request.resource_type, request.name
    )
}

/// Provider-assigned runtime properties: the payload plus generated
/// metadata, the kind of values only available after materialization.
fn runtime_properties(request: &ProvisionRequest, id: &str) -> serde_json::Value {
    let mut properties = match &request.payload {
        serde_json::Value::Object(map) => map.clone(),
        other => {
            let mut map = serde_json::Map::new();
            if !other.is_null() {
                map.insert("value".to_string(), other.clone());
            }
            map
        }
    };
    let mut hasher = Sha256::new();
    hasher.update(id.as_bytes());
    let principal = hex::encode(hasher.finalize());
    properties.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    properties.insert(
        "principalId".to_string(),
        serde_json::Value::String(principal[..32].to_string()),
    );
    properties.insert(
        "provisioningState".to_string(),
        serde_json::Value::String("Succeeded".to_string()),
    );
    serde_json::Value::Object(properties)
}

#[async_trait]
impl Provisioner for LocalProvisioner {
    async fn create_or_update(
        &self,
        request: ProvisionRequest,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let id = resource_id(&request);
        let desired = StoredResource {
            resource_type: request.resource_type.clone(),
            api_version: request.api_version.clone(),
            payload: request.payload.clone(),
        };

        let mut state = self.state.lock().await;
        let no_op = state.resources.get(&id) == Some(&desired);
        if no_op {
            debug!(resource = %id, "remote state already converged, no-op");
        } else {
            state.resources.insert(id.clone(), desired);
            self.persist(&state)?;
        }
        Ok(ProvisionOutcome {
            properties: runtime_properties(&request, &id),
            resource_id: id,
            no_op,
        })
    }
}
