//! Image service client.
//!
//! Session setup resolves a boot set's manifest path to an image record
//! so it can check the image exists and, for SBPS-rooted images, tag the
//! image for projection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use bos_store::types::Arch;

use crate::error::Result;
use crate::retry::{retry_transient, status_error, transport_error};
use crate::ClientError;

const SERVICE: &str = "ims";

/// An image record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    /// Image id.
    pub id: String,
    /// Image name.
    #[serde(default)]
    pub name: String,
    /// Architecture the image was built for.
    #[serde(default)]
    pub arch: Arch,
}

/// Extract the image id from a boot-set manifest path.
///
/// Manifest paths look like `s3://boot-images/<image id>/manifest.json`;
/// anything that does not match that shape yields `None`.
#[must_use]
pub fn image_id_from_manifest_path(path: &str) -> Option<&str> {
    let rest = path.strip_prefix("s3://")?;
    let mut parts = rest.split('/');
    let _bucket = parts.next()?;
    let image_id = parts.next()?;
    let file = parts.next()?;
    if image_id.is_empty() || !file.ends_with(".json") || parts.next().is_some() {
        return None;
    }
    Some(image_id)
}

/// Client contract for the image service.
#[async_trait]
pub trait ImageService: Send + Sync {
    /// Look up an image by id; `None` when the service does not know it.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries or terminal HTTP errors other than 404.
    async fn get_image(&self, image_id: &str, timeout: Duration) -> Result<Option<Image>>;

    /// Set a metadata tag on an image.
    ///
    /// # Errors
    ///
    /// Fails on exhausted retries or terminal HTTP errors.
    async fn tag_image(
        &self,
        image_id: &str,
        key: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<()>;
}

#[derive(Debug, Serialize)]
struct TagRequest<'a> {
    operation: &'static str,
    key: &'a str,
    value: &'a str,
}

/// HTTP client for the image service.
#[derive(Debug, Clone)]
pub struct HttpImageService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpImageService {
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
impl ImageService for HttpImageService {
    async fn get_image(&self, image_id: &str, timeout: Duration) -> Result<Option<Image>> {
        let url = format!("{}/images/{image_id}", self.base_url);
        retry_transient("ims get_image", || async {
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
                .json::<Image>()
                .await
                .map(Some)
                .map_err(|e| ClientError::Decode {
                    service: SERVICE,
                    message: e.to_string(),
                })
        })
        .await
    }

    async fn tag_image(
        &self,
        image_id: &str,
        key: &str,
        value: &str,
        timeout: Duration,
    ) -> Result<()> {
        let url = format!("{}/images/{image_id}/metadata", self.base_url);
        let request = TagRequest {
            operation: "set",
            key,
            value,
        };
        retry_transient("ims tag_image", || async {
            let response = self
                .client
                .patch(&url)
                .timeout(timeout)
                .json(&request)
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

/// In-memory image service for tests.
#[derive(Debug, Default)]
pub struct MockImageService {
    images: Mutex<HashMap<String, Image>>,
    tags: Mutex<Vec<(String, String, String)>>,
}

impl MockImageService {
    /// Create an empty mock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an image.
    pub fn add_image(&self, image: Image) {
        self.images.lock().insert(image.id.clone(), image);
    }

    /// Tags set so far, as `(image id, key, value)` tuples.
    #[must_use]
    pub fn tags(&self) -> Vec<(String, String, String)> {
        self.tags.lock().clone()
    }
}

#[async_trait]
impl ImageService for MockImageService {
    async fn get_image(&self, image_id: &str, _timeout: Duration) -> Result<Option<Image>> {
        Ok(self.images.lock().get(image_id).cloned())
    }

    async fn tag_image(
        &self,
        image_id: &str,
        key: &str,
        value: &str,
        _timeout: Duration,
    ) -> Result<()> {
        if !self.images.lock().contains_key(image_id) {
            return Err(ClientError::Status {
                service: SERVICE,
                status: 404,
                message: format!("image {image_id} not found"),
            });
        }
        self.tags
            .lock()
            .push((image_id.to_string(), key.to_string(), value.to_string()));
        Ok(())
    }
}
