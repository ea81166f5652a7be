//! Tenant management service client.
//!
//! Used at the API boundary to reject unknown tenants and during session
//! setup to restrict the effective node set to hardware the tenant owns.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use bos_core::Tenant;

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::ClientError;

const SERVICE: &str = "tapms";

/// Client contract for the tenant management service.
#[async_trait]
pub trait TenantInfo: Send + Sync {
    /// True when the tenant exists. The untenanted bucket always exists.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries or terminal HTTP errors other than 404.
    async fn tenant_exists(&self, tenant: &Tenant, timeout: Duration) -> Result<bool>;

    /// The node ids the tenant owns. Empty for an unknown tenant.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries or terminal HTTP errors other than 404.
    async fn tenant_component_set(
        &self,
        tenant: &Tenant,
        timeout: Duration,
    ) -> Result<HashSet<String>>;
}

#[derive(Debug, Deserialize)]
struct TenantResponse {
    #[serde(default)]
    status: TenantStatus,
}

#[derive(Debug, Default, Deserialize)]
struct TenantStatus {
    #[serde(default, rename = "tenantresources")]
    tenant_resources: Vec<TenantResource>,
}

#[derive(Debug, Deserialize)]
struct TenantResource {
    #[serde(default)]
    xnames: Vec<String>,
}

/// HTTP client for the tenant management service.
#[derive(Debug, Clone)]
pub struct HttpTenantInfo {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTenantInfo {
    /// Create a client against the given base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    async fn fetch_tenant(
        &self,
        tenant: &Tenant,
        timeout: Duration,
    ) -> Result<Option<TenantResponse>> {
        let url = format!("{}/tenants/{}", self.base_url, tenant.as_str());
        retry_transient("tapms get_tenant", || async {
            let response = self
                .client
                .get(&url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(None);
            }
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            response
                .json::<TenantResponse>()
                .await
                .map(Some)
                .map_err(|e| ClientError::Decode {
                    service: SERVICE,
                    message: e.to_string(),
                })
        })
        .await
    }
}

#[async_trait]
impl TenantInfo for HttpTenantInfo {
    async fn tenant_exists(&self, tenant: &Tenant, timeout: Duration) -> Result<bool> {
        if tenant.is_untenanted() {
            return Ok(true);
        }
        Ok(self.fetch_tenant(tenant, timeout).await?.is_some())
    }

    async fn tenant_component_set(
        &self,
        tenant: &Tenant,
        timeout: Duration,
    ) -> Result<HashSet<String>> {
        if tenant.is_untenanted() {
            return Ok(HashSet::new());
        }
        let Some(response) = self.fetch_tenant(tenant, timeout).await? else {
            return Ok(HashSet::new());
        };
        Ok(response
            .status
            .tenant_resources
            .into_iter()
            .flat_map(|r| r.xnames)
            .collect())
    }
}

/// In-memory tenant service for tests.
#[derive(Debug, Default)]
pub struct MockTenantInfo {
    tenants: Mutex<HashMap<String, HashSet<String>>>,
}

impl MockTenantInfo {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tenant owning the given nodes.
    pub fn add_tenant(&self, tenant: &Tenant, nodes: &[&str]) {
        self.tenants.lock().insert(
            tenant.as_str().to_string(),
            nodes.iter().map(ToString::to_string).collect(),
        );
    }
}

#[async_trait]
impl TenantInfo for MockTenantInfo {
    async fn tenant_exists(&self, tenant: &Tenant, _timeout: Duration) -> Result<bool> {
        if tenant.is_untenanted() {
            return Ok(true);
        }
        Ok(self.tenants.lock().contains_key(tenant.as_str()))
    }

    async fn tenant_component_set(
        &self,
        tenant: &Tenant,
        _timeout: Duration,
    ) -> Result<HashSet<String>> {
        Ok(self
            .tenants
            .lock()
            .get(tenant.as_str())
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn untenanted_always_exists() {
        let tapms = MockTenantInfo::new();
        assert!(tapms
            .tenant_exists(&Tenant::untenanted(), Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn tenant_ownership() {
        let tapms = MockTenantInfo::new();
        let blue = Tenant::from("blue");
        tapms.add_tenant(&blue, &["x1", "x2"]);

        let timeout = Duration::from_secs(1);
        assert!(tapms.tenant_exists(&blue, timeout).await.unwrap());
        assert!(!tapms
            .tenant_exists(&Tenant::from("red"), timeout)
            .await
            .unwrap());

        let owned = tapms.tenant_component_set(&blue, timeout).await.unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned.contains("x1"));
    }
}
