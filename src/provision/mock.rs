//! Scriptable provisioner for executor tests.
//!
//! Lets tests inject transient/permanent failures per resource, add
//! artificial latency, and inspect call counts and in-flight windows (the
//! latter is how the concurrency tests observe that independent chains
//! actually overlap).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ProvisionError, ProvisionOutcome, ProvisionRequest, Provisioner};

/// One scripted reply for a named resource.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Succeed (optionally as a no-op).
    Succeed {
        /// Report the call as an idempotent no-op.
        no_op: bool,
    },
    /// Fail with a transient, retriable error.
    FailTransient,
    /// Fail with a permanent, non-retriable error.
    FailPermanent,
}

#[derive(Debug, Clone, Copy)]
struct CallWindow {
    started: Instant,
    finished: Instant,
}

/// In-memory provisioner with scripted behavior.
#[derive(Default)]
pub struct MockProvisioner {
    script: DashMap<String, VecDeque<MockResponse>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, CallWindow)>>,
}

impl MockProvisioner {
    /// Provisioner that succeeds every call immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add artificial latency to every call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue `times` transient failures for `name`; later calls succeed.
    pub fn fail_transient(&self, name: &str, times: usize) {
        let mut queue = self.script.entry(name.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(MockResponse::FailTransient);
        }
    }

    /// Make every call for `name` fail permanently.
    pub fn fail_permanent(&self, name: &str) {
        self.script
            .entry(name.to_string())
            .or_default()
            .push_back(MockResponse::FailPermanent);
        // Permanent failures repeat; the executor must not retry them, but a
        // buggy retry would otherwise "succeed" on the next pop.
    }

    /// Queue an explicit response sequence for `name`.
    pub fn script(&self, name: &str, responses: impl IntoIterator<Item = MockResponse>) {
        self.script
            .entry(name.to_string())
            .or_default()
            .extend(responses);
    }

    /// Number of calls observed for `name`.
    #[must_use]
    pub fn call_count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .expect("mock call log poisoned")
            .iter()
            .filter(|(n, _)| n == name)
            .count()
    }

    /// Whether any call for `a` was in flight at the same time as any call
    /// for `b`.
    #[must_use]
    pub fn calls_overlapped(&self, a: &str, b: &str) -> bool {
        let calls = self.calls.lock().expect("mock call log poisoned");
        let windows = |name: &str| {
            calls
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, w)| *w)
                .collect::<Vec<_>>()
        };
        for wa in windows(a) {
            for wb in windows(b) {
                if wa.started < wb.finished && wb.started < wa.finished {
                    return true;
                }
            }
        }
        false
    }

    fn next_response(&self, name: &str) -> MockResponse {
        let mut queue = self.script.entry(name.to_string()).or_default();
        match queue.front().cloned() {
            Some(MockResponse::FailPermanent) => MockResponse::FailPermanent,
            Some(response) => {
                queue.pop_front();
                response
            }
            None => MockResponse::Succeed { no_op: false },
        }
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    async fn create_or_update(
        &self,
        request: ProvisionRequest,
    ) -> Result<ProvisionOutcome, ProvisionError> {
        let started = Instant::now();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = self.next_response(&request.name);
        let window = CallWindow {
            started,
            finished: Instant::now(),
        };
        self.calls
            .lock()
            .expect("mock call log poisoned")
            .push((request.name.clone(), window));

        match response {
            MockResponse::Succeed { no_op } => {
                let id = format!("{}/{}/{}", request.scope, request.resource_type, request.name);
                let mut properties = match request.payload {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                properties.insert("id".to_string(), serde_json::Value::String(id.clone()));
                Ok(ProvisionOutcome {
                    resource_id: id,
                    properties: serde_json::Value::Object(properties),
                    no_op,
                })
            }
            MockResponse::FailTransient => {
                Err(ProvisionError::Transient("simulated rate limit".to_string()))
            }
            MockResponse::FailPermanent => Err(ProvisionError::Permanent(
                "simulated invalid configuration".to_string(),
            )),
        }
    }
}
