//! Power control service client.
//!
//! Two calls: query observed power state for a set of nodes, and request
//! a power transition. Transitions are batch operations; nodes that the
//! service cannot act on come back as per-node errors in the response
//! rather than failing the whole batch.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::{ensure_not_empty, ClientError};

const SERVICE: &str = "pcs";

/// Observed power state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerState {
    /// Node is powered on.
    On,
    /// Node is powered off.
    Off,
    /// The service could not determine the state.
    Undefined,
}

/// A power transition operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerOperation {
    /// Power on.
    On,
    /// Graceful (OS-assisted) power off.
    SoftOff,
    /// Forceful power off.
    ForceOff,
}

impl PowerOperation {
    /// The operation name on the wire.
    #[must_use]
    pub const fn wire_name(self) -> &'static str {
        match self {
            Self::On => "On",
            Self::SoftOff => "Soft-Off",
            Self::ForceOff => "Force-Off",
        }
    }
}

/// Outcome of a transition request: per-node errors for nodes the service
/// rejected. Nodes absent from the map were accepted.
pub type TransitionErrors = HashMap<String, String>;

/// Client contract for the power control service.
#[async_trait]
pub trait PowerControl: Send + Sync {
    /// Query the power state of the given nodes.
    ///
    /// Nodes the service has no answer for are reported as
    /// [`PowerState::Undefined`] or omitted entirely.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    async fn power_status(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, PowerState>>;

    /// Request a power transition for the given nodes.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    /// Per-node rejections are returned in the map, not as errors.
    async fn transition(
        &self,
        operation: PowerOperation,
        ids: &[String],
        timeout: Duration,
    ) -> Result<TransitionErrors>;
}

#[derive(Debug, Serialize)]
struct PowerStatusRequest<'a> {
    xname: &'a [String],
}

#[derive(Debug, Deserialize)]
struct PowerStatusResponse {
    status: Vec<PowerStatusEntry>,
}

#[derive(Debug, Deserialize)]
struct PowerStatusEntry {
    xname: String,
    #[serde(default)]
    power_state: Option<PowerState>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct TransitionRequest<'a> {
    operation: &'static str,
    location: Vec<TransitionLocation<'a>>,
}

#[derive(Debug, Serialize)]
struct TransitionLocation<'a> {
    xname: &'a str,
}

#[derive(Debug, Deserialize)]
struct TransitionResponse {
    #[allow(dead_code)]
    transition_id: String,
    #[serde(default)]
    errors: HashMap<String, String>,
}

/// HTTP client for the power control service.
#[derive(Debug, Clone)]
pub struct HttpPowerControl {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPowerControl {
    /// Create a client against the given base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl PowerControl for HttpPowerControl {
    async fn power_status(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, PowerState>> {
        ensure_not_empty(ids, "power_status")?;
        let url = format!("{}/power-status", self.base_url);

        let response: PowerStatusResponse = retry_transient("pcs power_status", || async {
            let response = self
                .client
                .post(&url)
                .timeout(timeout)
                .json(&PowerStatusRequest { xname: ids })
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            response.json().await.map_err(|e| ClientError::Decode {
                service: SERVICE,
                message: e.to_string(),
            })
        })
        .await?;

        let mut states = HashMap::with_capacity(response.status.len());
        for entry in response.status {
            if let Some(error) = entry.error {
                tracing::debug!(xname = %entry.xname, %error, "power status error for node");
                states.insert(entry.xname, PowerState::Undefined);
            } else {
                states.insert(entry.xname, entry.power_state.unwrap_or(PowerState::Undefined));
            }
        }
        Ok(states)
    }

    async fn transition(
        &self,
        operation: PowerOperation,
        ids: &[String],
        timeout: Duration,
    ) -> Result<TransitionErrors> {
        ensure_not_empty(ids, "transition")?;
        let url = format!("{}/transitions", self.base_url);
        let request = TransitionRequest {
            operation: operation.wire_name(),
            location: ids.iter().map(|id| TransitionLocation { xname: id }).collect(),
        };

        let response: TransitionResponse = retry_transient("pcs transition", || async {
            let response = self
                .client
                .post(&url)
                .timeout(timeout)
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            response.json().await.map_err(|e| ClientError::Decode {
                service: SERVICE,
                message: e.to_string(),
            })
        })
        .await?;

        tracing::debug!(
            operation = operation.wire_name(),
            requested = ids.len(),
            rejected = response.errors.len(),
            "power transition created"
        );
        Ok(response.errors)
    }
}

/// In-memory power control for tests and scheduler-less development.
///
/// Transitions update the mock's power states unless a per-node error is
/// configured, in which case the node is reported back as rejected.
#[derive(Debug, Default)]
pub struct MockPowerControl {
    states: Mutex<HashMap<String, PowerState>>,
    errors: Mutex<HashMap<String, String>>,
    calls: Mutex<Vec<(PowerOperation, Vec<String>)>>,
}

impl MockPowerControl {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the observed power state of a node.
    pub fn set_power_state(&self, id: &str, state: PowerState) {
        self.states.lock().insert(id.to_string(), state);
    }

    /// Configure a per-node transition error.
    pub fn set_transition_error(&self, id: &str, message: &str) {
        self.errors.lock().insert(id.to_string(), message.to_string());
    }

    /// Remove a per-node transition error.
    pub fn clear_transition_error(&self, id: &str) {
        self.errors.lock().remove(id);
    }

    /// The transitions requested so far.
    #[must_use]
    pub fn transitions(&self) -> Vec<(PowerOperation, Vec<String>)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl PowerControl for MockPowerControl {
    async fn power_status(
        &self,
        ids: &[String],
        _timeout: Duration,
    ) -> Result<HashMap<String, PowerState>> {
        ensure_not_empty(ids, "power_status")?;
        let states = self.states.lock();
        Ok(ids
            .iter()
            .filter_map(|id| states.get(id).map(|state| (id.clone(), *state)))
            .collect())
    }

    async fn transition(
        &self,
        operation: PowerOperation,
        ids: &[String],
        _timeout: Duration,
    ) -> Result<TransitionErrors> {
        ensure_not_empty(ids, "transition")?;
        let mut sorted = ids.to_vec();
        sorted.sort();
        self.calls.lock().push((operation, sorted));

        let errors = self.errors.lock();
        let mut states = self.states.lock();
        let mut rejected = TransitionErrors::new();
        for id in ids {
            if let Some(message) = errors.get(id) {
                rejected.insert(id.clone(), message.clone());
                continue;
            }
            let target = match operation {
                PowerOperation::On => PowerState::On,
                PowerOperation::SoftOff | PowerOperation::ForceOff => PowerState::Off,
            };
            states.insert(id.clone(), target);
        }
        Ok(rejected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(ToString::to_string).collect()
    }

    #[tokio::test]
    async fn empty_list_is_refused() {
        let pcs = MockPowerControl::new();
        let result = pcs.power_status(&[], Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::EmptyComponentList(_))));
        let result = pcs
            .transition(PowerOperation::On, &[], Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(ClientError::EmptyComponentList(_))));
    }

    #[tokio::test]
    async fn transitions_update_mock_state() {
        let pcs = MockPowerControl::new();
        pcs.set_power_state("x1", PowerState::Off);

        let rejected = pcs
            .transition(PowerOperation::On, &ids(&["x1"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(rejected.is_empty());

        let states = pcs
            .power_status(&ids(&["x1"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(states["x1"], PowerState::On);
    }

    #[tokio::test]
    async fn per_node_errors_do_not_fail_the_batch() {
        let pcs = MockPowerControl::new();
        pcs.set_power_state("x1", PowerState::Off);
        pcs.set_power_state("x2", PowerState::Off);
        pcs.set_transition_error("x2", "node locked");

        let rejected = pcs
            .transition(PowerOperation::On, &ids(&["x1", "x2"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected["x2"], "node locked");

        let states = pcs
            .power_status(&ids(&["x1", "x2"]), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(states["x1"], PowerState::On);
        assert_eq!(states["x2"], PowerState::Off);
    }
}
