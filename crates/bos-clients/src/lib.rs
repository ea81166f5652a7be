//! Clients for the external services the boot orchestrator drives.
//!
//! Every collaborator — power control, hardware state, boot script,
//! image service, object store, configuration framework, tenant service —
//! is reached through a trait defined here, with two implementations:
//! an `Http*` client speaking the real protocol and a `Mock*` client
//! holding in-memory state for tests and scheduler-less development.
//!
//! Shared behavior across all HTTP clients:
//!
//! - every call takes an explicit read timeout (operators draw it from
//!   the options snapshot)
//! - transient failures (connect errors, timeouts, 5xx) are retried with
//!   capped exponential backoff before surfacing
//! - calls that accept component lists refuse empty input instead of
//!   issuing a pointless request
//! - responses that can be large (image manifests) are read through a
//!   size gate

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod bss;
pub mod cfs;
pub mod error;
pub mod hsm;
pub mod ims;
pub mod pcs;
mod retry;
pub mod s3;
pub mod tapms;

pub use error::{ClientError, Result};

use std::time::Duration;

/// Build the shared `reqwest` client. The connect timeout is fixed; read
/// timeouts are per-call.
///
/// # Panics
///
/// Panics if the TLS backend cannot be initialized, which is a
/// misconfigured build rather than a runtime condition.
#[must_use]
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .build()
        .expect("failed to create HTTP client")
}

/// Guard shared by every list-taking call: external services are never
/// invoked with an empty component list.
pub(crate) fn ensure_not_empty(ids: &[String], call: &'static str) -> Result<()> {
    if ids.is_empty() {
        return Err(ClientError::EmptyComponentList(call));
    }
    Ok(())
}
