//! Boot script service client.
//!
//! One call: register the boot parameters for a set of nodes and receive
//! a referral token. The service hands the token back to a node's
//! bootloader when it network-boots, mapping it to these parameters.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::{ensure_not_empty, ClientError};

const SERVICE: &str = "bss";

/// Name of the response header carrying the referral token.
pub const REFERRAL_TOKEN_HEADER: &str = "bss-referral-token";

/// Client contract for the boot script service.
#[async_trait]
pub trait BootScript: Send + Sync {
    /// Register boot parameters for the given nodes and return the
    /// referral token the service issued.
    ///
    /// # Errors
    ///
    /// Fails on empty input, exhausted retries, terminal HTTP errors, or
    /// a response missing the token header.
    async fn set_boot_params(
        &self,
        nodes: &[String],
        kernel: &str,
        initrd: &str,
        params: &str,
        timeout: Duration,
    ) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct BootParametersRequest<'a> {
    hosts: &'a [String],
    kernel: &'a str,
    initrd: &'a str,
    params: &'a str,
}

/// HTTP client for the boot script service.
#[derive(Debug, Clone)]
pub struct HttpBootScript {
    client: reqwest::Client,
    base_url: String,
}

impl HttpBootScript {
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
impl BootScript for HttpBootScript {
    async fn set_boot_params(
        &self,
        nodes: &[String],
        kernel: &str,
        initrd: &str,
        params: &str,
        timeout: Duration,
    ) -> Result<String> {
        ensure_not_empty(nodes, "set_boot_params")?;
        let url = format!("{}/bootparameters", self.base_url);
        let request = BootParametersRequest {
            hosts: nodes,
            kernel,
            initrd,
            params,
        };

        retry_transient("bss set_boot_params", || async {
            let response = self
                .client
                .put(&url)
                .timeout(timeout)
                .json(&request)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            let token = response
                .headers()
                .get(REFERRAL_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(ToString::to_string);
            token.ok_or_else(|| ClientError::Decode {
                service: SERVICE,
                message: format!("response missing {REFERRAL_TOKEN_HEADER} header"),
            })
        })
        .await
    }
}

/// Recorded boot-parameter registration, for test assertions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBootParams {
    /// The nodes registered.
    pub nodes: Vec<String>,
    /// Kernel path.
    pub kernel: String,
    /// Initrd path.
    pub initrd: String,
    /// Kernel parameter string.
    pub params: String,
    /// Token issued for this registration.
    pub token: String,
}

/// In-memory boot script service for tests.
#[derive(Debug, Default)]
pub struct MockBootScript {
    counter: Mutex<u64>,
    registrations: Mutex<Vec<RecordedBootParams>>,
    fail_with: Mutex<Option<String>>,
}

impl MockBootScript {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with the given message.
    pub fn fail_with(&self, message: &str) {
        *self.fail_with.lock() = Some(message.to_string());
    }

    /// The registrations recorded so far.
    #[must_use]
    pub fn registrations(&self) -> Vec<RecordedBootParams> {
        self.registrations.lock().clone()
    }
}

#[async_trait]
impl BootScript for MockBootScript {
    async fn set_boot_params(
        &self,
        nodes: &[String],
        kernel: &str,
        initrd: &str,
        params: &str,
        _timeout: Duration,
    ) -> Result<String> {
        ensure_not_empty(nodes, "set_boot_params")?;
        if let Some(message) = self.fail_with.lock().clone() {
            return Err(ClientError::Status {
                service: SERVICE,
                status: 400,
                message,
            });
        }
        let mut counter = self.counter.lock();
        *counter += 1;
        let token = format!("token-{counter:04}");
        let mut sorted = nodes.to_vec();
        sorted.sort();
        self.registrations.lock().push(RecordedBootParams {
            nodes: sorted,
            kernel: kernel.to_string(),
            initrd: initrd.to_string(),
            params: params.to_string(),
            token: token.clone(),
        });
        Ok(token)
    }
}
