//! Configuration framework client.
//!
//! Two calls: read the configuration state of a set of components, and
//! set the desired configuration for a batch of components.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::{ensure_not_empty, ClientError};

const SERVICE: &str = "cfs";

/// Configuration state reported for a component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationStatus {
    /// Configuration applied successfully.
    Configured,
    /// Configuration queued or in progress.
    #[default]
    Pending,
    /// Configuration failed.
    Failed,
    /// The service reported something unrecognized.
    #[serde(other)]
    Unknown,
}

/// A component as the configuration framework sees it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CfsComponent {
    /// Component id.
    pub id: String,
    /// Configuration currently set as desired, empty for none.
    #[serde(default)]
    pub desired_config: String,
    /// Where the component is in applying it.
    #[serde(default)]
    pub configuration_status: ConfigurationStatus,
    /// Whether configuration is enabled for this component.
    #[serde(default)]
    pub enabled: bool,
}

/// Client contract for the configuration framework.
#[async_trait]
pub trait ConfigFramework: Send + Sync {
    /// Configuration state for the given components. Components the
    /// framework does not know are absent from the map.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    async fn components(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, CfsComponent>>;

    /// Set the desired configuration for a batch of components.
    ///
    /// `enabled` controls whether the framework may configure now (the
    /// node is already booted into the right artifacts) or must wait for
    /// the reboot flow to enable it.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, or terminal HTTP errors.
    async fn set_desired_config(
        &self,
        ids: &[String],
        configuration: &str,
        enabled: bool,
        session: &str,
        timeout: Duration,
    ) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct DesiredConfigPatch<'a> {
    ids: &'a [String],
    desired_config: &'a str,
    enabled: bool,
    tags: HashMap<&'static str, &'a str>,
}

#[derive(Debug, Deserialize)]
struct ComponentsResponse {
    #[serde(default)]
    components: Vec<CfsComponent>,
}

/// HTTP client for the configuration framework.
#[derive(Debug, Clone)]
pub struct HttpConfigFramework {
    client: reqwest::Client,
    base_url: String,
}

impl HttpConfigFramework {
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
impl ConfigFramework for HttpConfigFramework {
    async fn components(
        &self,
        ids: &[String],
        timeout: Duration,
    ) -> Result<HashMap<String, CfsComponent>> {
        ensure_not_empty(ids, "cfs components")?;
        let url = format!("{}/components", self.base_url);
        let joined = ids.join(",");

        let response: ComponentsResponse = retry_transient("cfs components", || async {
            let response = self
                .client
                .get(&url)
                .query(&[("ids", joined.as_str())])
                .timeout(timeout)
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

        Ok(response
            .components
            .into_iter()
            .map(|c| (c.id.clone(), c))
            .collect())
    }

    async fn set_desired_config(
        &self,
        ids: &[String],
        configuration: &str,
        enabled: bool,
        session: &str,
        timeout: Duration,
    ) -> Result<()> {
        ensure_not_empty(ids, "cfs set_desired_config")?;
        let url = format!("{}/components", self.base_url);
        let mut tags = HashMap::new();
        tags.insert("bos_session", session);
        let patch = DesiredConfigPatch {
            ids,
            desired_config: configuration,
            enabled,
            tags,
        };

        retry_transient("cfs set_desired_config", || async {
            let response = self
                .client
                .patch(&url)
                .timeout(timeout)
                .json(&patch)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            Ok(())
        })
        .await
    }
}

/// In-memory configuration framework for tests.
#[derive(Debug, Default)]
pub struct MockConfigFramework {
    components: Mutex<HashMap<String, CfsComponent>>,
}

impl MockConfigFramework {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a component record.
    pub fn set_component(&self, component: CfsComponent) {
        self.components
            .lock()
            .insert(component.id.clone(), component);
    }

    /// Mark a component's configuration state.
    pub fn set_status(&self, id: &str, status: ConfigurationStatus) {
        self.components
            .lock()
            .entry(id.to_string())
            .or_insert_with(|| CfsComponent {
                id: id.to_string(),
                ..CfsComponent::default()
            })
            .configuration_status = status;
    }
}

#[async_trait]
impl ConfigFramework for MockConfigFramework {
    async fn components(
        &self,
        ids: &[String],
        _timeout: Duration,
    ) -> Result<HashMap<String, CfsComponent>> {
        ensure_not_empty(ids, "cfs components")?;
        let components = self.components.lock();
        Ok(ids
            .iter()
            .filter_map(|id| components.get(id).map(|c| (id.clone(), c.clone())))
            .collect())
    }

    async fn set_desired_config(
        &self,
        ids: &[String],
        configuration: &str,
        enabled: bool,
        _session: &str,
        _timeout: Duration,
    ) -> Result<()> {
        ensure_not_empty(ids, "cfs set_desired_config")?;
        let mut components = self.components.lock();
        for id in ids {
            let entry = components
                .entry(id.clone())
                .or_insert_with(|| CfsComponent {
                    id: id.clone(),
                    ..CfsComponent::default()
                });
            entry.desired_config = configuration.to_string();
            entry.enabled = enabled;
            entry.configuration_status = ConfigurationStatus::Pending;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_then_read_back() {
        let cfs = MockConfigFramework::new();
        let ids = vec!["x1".to_string(), "x2".to_string()];
        let timeout = Duration::from_secs(1);

        cfs.set_desired_config(&ids, "compute-config", true, "session-1", timeout)
            .await
            .unwrap();
        cfs.set_status("x1", ConfigurationStatus::Configured);

        let components = cfs.components(&ids, timeout).await.unwrap();
        assert_eq!(components["x1"].desired_config, "compute-config");
        assert_eq!(
            components["x1"].configuration_status,
            ConfigurationStatus::Configured
        );
        assert_eq!(
            components["x2"].configuration_status,
            ConfigurationStatus::Pending
        );
    }

    #[tokio::test]
    async fn unknown_components_are_absent() {
        let cfs = MockConfigFramework::new();
        let ids = vec!["ghost".to_string()];
        let components = cfs.components(&ids, Duration::from_secs(1)).await.unwrap();
        assert!(components.is_empty());
    }
}
