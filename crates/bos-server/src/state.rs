//! Server application state.

use std::sync::Arc;

use bos_clients::ims::ImageService;
use bos_clients::s3::ObjectStore;
use bos_clients::tapms::TenantInfo;
use bos_store::types::{OptionsData, OptionsSnapshot};
use bos_store::{kind, Store};

use crate::error::ApiError;

/// Shared state available to every request handler.
pub struct AppState<S: Store> {
    /// The persistent store.
    pub store: Arc<S>,
    /// Tenant service, for rejecting unknown tenants.
    pub tenants: Arc<dyn TenantInfo>,
    /// Image service, for template validation.
    pub ims: Arc<dyn ImageService>,
    /// Object store, for boot-artifact validation.
    pub objects: Arc<dyn ObjectStore>,
}

impl<S: Store> AppState<S> {
    /// Bundle the state.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        tenants: Arc<dyn TenantInfo>,
        ims: Arc<dyn ImageService>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            store,
            tenants,
            ims,
            objects,
        }
    }

    /// The current options view, merged over defaults.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    pub fn options(&self) -> Result<OptionsSnapshot, ApiError> {
        let data: Option<OptionsData> = self.store.get(kind::OPTIONS, kind::OPTIONS_KEY)?;
        Ok(data
            .map(|d| OptionsSnapshot::from_data(&d))
            .unwrap_or_default())
    }
}

impl<S: Store> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            tenants: Arc::clone(&self.tenants),
            ims: Arc::clone(&self.ims),
            objects: Arc::clone(&self.objects),
        }
    }
}
