//! The dependency bundle handed to every operator.
//!
//! Operators receive everything they touch — store, clients, options,
//! liveness — as one explicit value at construction. Nothing in this
//! crate reaches for process-wide state.

use std::sync::Arc;

use bos_clients::bss::BootScript;
use bos_clients::cfs::ConfigFramework;
use bos_clients::hsm::HardwareState;
use bos_clients::ims::ImageService;
use bos_clients::pcs::PowerControl;
use bos_clients::s3::ObjectStore;
use bos_clients::tapms::TenantInfo;
use bos_store::Store;

use crate::liveness::Liveness;
use crate::options::OptionsProvider;

/// Handles to all external services.
#[derive(Clone)]
pub struct Clients {
    /// Power control service.
    pub pcs: Arc<dyn PowerControl>,
    /// Hardware state manager.
    pub hsm: Arc<dyn HardwareState>,
    /// Boot script service.
    pub bss: Arc<dyn BootScript>,
    /// Image service.
    pub ims: Arc<dyn ImageService>,
    /// Object store.
    pub objects: Arc<dyn ObjectStore>,
    /// Configuration framework.
    pub cfs: Arc<dyn ConfigFramework>,
    /// Tenant management service.
    pub tenants: Arc<dyn TenantInfo>,
}

/// Everything an operator needs to run a pass.
pub struct Env<S: Store> {
    /// The shared persistent store.
    pub store: Arc<S>,
    /// External service clients.
    pub clients: Clients,
    /// Options snapshot provider.
    pub options: OptionsProvider<S>,
    /// Liveness probe file.
    pub liveness: Liveness,
}

impl<S: Store> Env<S> {
    /// Bundle an environment.
    #[must_use]
    pub fn new(store: Arc<S>, clients: Clients, liveness: Liveness) -> Self {
        let options = OptionsProvider::new(Arc::clone(&store));
        Self {
            store,
            clients,
            options,
            liveness,
        }
    }
}

impl<S: Store> Clone for Env<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clients: self.clients.clone(),
            options: self.options.clone(),
            liveness: self.liveness.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) use testing::test_env;
