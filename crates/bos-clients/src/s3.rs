//! Object store client and boot-image manifest parsing.
//!
//! Boot images are described by a small JSON manifest in the object
//! store listing the kernel, initrd and optional boot-parameter
//! artifacts. Manifests come from outside the service, so reads are
//! length-gated: a manifest larger than the caller's cap aborts with an
//! error before any decoding happens.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::ClientError;

const SERVICE: &str = "s3";

/// Client contract for the object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Check that an object exists (and matches the etag when given).
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries, a missing object, or an etag mismatch.
    async fn head(&self, path: &str, etag: &str, timeout: Duration) -> Result<()>;

    /// Fetch an object, refusing to read more than `max_bytes`.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries, a missing object, an etag mismatch, or
    /// an oversize response.
    async fn get_object(
        &self,
        path: &str,
        etag: &str,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

/// A link to an artifact in the object store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ArtifactLink {
    /// Object path.
    #[serde(default)]
    pub path: String,
    /// Object etag; empty when unrecorded.
    #[serde(default)]
    pub etag: String,
}

#[derive(Debug, Deserialize)]
struct RawManifest {
    #[serde(default)]
    artifacts: Vec<RawArtifact>,
}

#[derive(Debug, Deserialize)]
struct RawArtifact {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    link: ArtifactLink,
}

/// The artifacts a boot-image manifest names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootImageManifest {
    /// Kernel artifact.
    pub kernel: ArtifactLink,
    /// Initrd artifact.
    pub initrd: ArtifactLink,
    /// Optional root filesystem artifact.
    pub rootfs: Option<ArtifactLink>,
    /// Optional boot-parameters artifact.
    pub boot_parameters: Option<ArtifactLink>,
}

/// Parse a boot-image manifest.
///
/// Artifact entries are matched on their media type containing `kernel`,
/// `initrd` or `boot_parameters`.
///
/// # Errors
///
/// Fails when the manifest does not decode or names no kernel.
pub fn parse_manifest(bytes: &[u8]) -> Result<BootImageManifest> {
    let raw: RawManifest = serde_json::from_slice(bytes).map_err(|e| ClientError::Decode {
        service: SERVICE,
        message: format!("invalid manifest: {e}"),
    })?;

    let mut manifest = BootImageManifest::default();
    for artifact in raw.artifacts {
        if artifact.kind.contains("initrd") {
            manifest.initrd = artifact.link;
        } else if artifact.kind.contains("boot_parameters") {
            manifest.boot_parameters = Some(artifact.link);
        } else if artifact.kind.contains("rootfs") {
            manifest.rootfs = Some(artifact.link);
        } else if artifact.kind.contains("kernel") {
            manifest.kernel = artifact.link;
        }
    }
    if manifest.kernel.path.is_empty() {
        return Err(ClientError::Decode {
            service: SERVICE,
            message: "manifest names no kernel artifact".to_string(),
        });
    }
    Ok(manifest)
}

/// HTTP client for an S3-compatible object gateway.
///
/// Paths of the form `s3://bucket/key` are resolved against the
/// gateway's base URL as `<base>/bucket/key`.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpObjectStore {
    /// Create a client against the given gateway base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url_for(&self, path: &str) -> String {
        let stripped = path.strip_prefix("s3://").unwrap_or(path);
        format!("{}/{stripped}", self.base_url)
    }
}

fn check_etag(service: &'static str, response: &reqwest::Response, expected: &str) -> Result<()> {
    if expected.is_empty() {
        return Ok(());
    }
    let actual = response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim_matches('"').to_string())
        .unwrap_or_default();
    if actual == expected {
        Ok(())
    } else {
        Err(ClientError::Status {
            service,
            status: 412,
            message: format!("etag mismatch: expected {expected}, got {actual}"),
        })
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn head(&self, path: &str, etag: &str, timeout: Duration) -> Result<()> {
        let url = self.url_for(path);
        retry_transient("s3 head", || async {
            let response = self
                .client
                .head(&url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            check_etag(SERVICE, &response, etag)
        })
        .await
    }

    async fn get_object(
        &self,
        path: &str,
        etag: &str,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let url = self.url_for(path);
        retry_transient("s3 get_object", || async {
            let mut response = self
                .client
                .get(&url)
                .timeout(timeout)
                .send()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?;
            if !response.status().is_success() {
                return Err(status_error(SERVICE, response).await);
            }
            check_etag(SERVICE, &response, etag)?;

            // Gate on the declared length first, then enforce the cap
            // while streaming in case the declaration lied.
            if let Some(declared) = response.content_length() {
                if usize::try_from(declared).unwrap_or(usize::MAX) > max_bytes {
                    return Err(ClientError::ResponseTooLarge {
                        service: SERVICE,
                        limit: max_bytes,
                    });
                }
            }
            let mut body = Vec::new();
            while let Some(chunk) = response
                .chunk()
                .await
                .map_err(|e| transport_error(SERVICE, &e))?
            {
                if body.len() + chunk.len() > max_bytes {
                    return Err(ClientError::ResponseTooLarge {
                        service: SERVICE,
                        limit: max_bytes,
                    });
                }
                body.extend_from_slice(&chunk);
            }
            Ok(body)
        })
        .await
    }
}

/// In-memory object store for tests.
#[derive(Debug, Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<String, (String, Vec<u8>)>>,
}

impl MockObjectStore {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object under a path with an etag.
    pub fn put_object(&self, path: &str, etag: &str, bytes: &[u8]) {
        self.objects
            .lock()
            .insert(path.to_string(), (etag.to_string(), bytes.to_vec()));
    }

    fn lookup(&self, path: &str, etag: &str) -> Result<Vec<u8>> {
        let objects = self.objects.lock();
        let (stored_etag, bytes) = objects.get(path).ok_or_else(|| ClientError::Status {
            service: SERVICE,
            status: 404,
            message: format!("no object at {path}"),
        })?;
        if !etag.is_empty() && stored_etag != etag {
            return Err(ClientError::Status {
                service: SERVICE,
                status: 412,
                message: format!("etag mismatch for {path}"),
            });
        }
        Ok(bytes.clone())
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn head(&self, path: &str, etag: &str, _timeout: Duration) -> Result<()> {
        self.lookup(path, etag).map(|_| ())
    }

    async fn get_object(
        &self,
        path: &str,
        etag: &str,
        max_bytes: usize,
        _timeout: Duration,
    ) -> Result<Vec<u8>> {
        let bytes = self.lookup(path, etag)?;
        if bytes.len() > max_bytes {
            return Err(ClientError::ResponseTooLarge {
                service: SERVICE,
                limit: max_bytes,
            });
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"{
        "artifacts": [
            {"type": "application/vnd.cray.image.kernel",
             "link": {"path": "s3://boot-images/1/kernel", "etag": "k1"}},
            {"type": "application/vnd.cray.image.initrd",
             "link": {"path": "s3://boot-images/1/initrd", "etag": "i1"}},
            {"type": "application/vnd.cray.image.parameters.boot_parameters",
             "link": {"path": "s3://boot-images/1/boot_parameters", "etag": "b1"}}
        ]
    }"#;

    #[test]
    fn manifest_parsing() {
        let manifest = parse_manifest(MANIFEST.as_bytes()).unwrap();
        assert_eq!(manifest.kernel.path, "s3://boot-images/1/kernel");
        assert_eq!(manifest.initrd.path, "s3://boot-images/1/initrd");
        assert_eq!(
            manifest.boot_parameters.unwrap().path,
            "s3://boot-images/1/boot_parameters"
        );
    }

    #[test]
    fn manifest_without_kernel_is_rejected() {
        let result = parse_manifest(br#"{"artifacts": []}"#);
        assert!(matches!(result, Err(ClientError::Decode { .. })));
    }

    #[tokio::test]
    async fn size_gate_enforced() {
        let store = MockObjectStore::new();
        store.put_object("s3://b/big", "e", &[0u8; 1024]);

        let timeout = Duration::from_secs(1);
        let result = store.get_object("s3://b/big", "e", 512, timeout).await;
        assert!(matches!(result, Err(ClientError::ResponseTooLarge { .. })));
        assert!(store.get_object("s3://b/big", "e", 2048, timeout).await.is_ok());
    }

    #[tokio::test]
    async fn etag_mismatch_is_terminal() {
        let store = MockObjectStore::new();
        store.put_object("s3://b/k", "good", b"data");

        let result = store.head("s3://b/k", "bad", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ClientError::Status { status: 412, .. })));
        assert!(store.head("s3://b/k", "good", Duration::from_secs(1)).await.is_ok());
        assert!(store.head("s3://b/k", "", Duration::from_secs(1)).await.is_ok());
    }
}
