//! Options snapshot provider.
//!
//! The driver loads one [`OptionsSnapshot`] per operator iteration and
//! passes it by value into the pass, so every decision within a pass
//! sees one consistent view and nothing re-reads options mid-flight.

use std::sync::Arc;

use bos_store::types::{OptionsData, OptionsSnapshot};
use bos_store::{kind, Store};

/// Reads the options record and merges it over the typed defaults.
pub struct OptionsProvider<S: Store> {
    store: Arc<S>,
}

impl<S: Store> OptionsProvider<S> {
    /// Create a provider over the given store.
    #[must_use]
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Load the current snapshot. A missing record yields the defaults;
    /// a store failure is logged and also yields the defaults, so an
    /// options outage degrades behavior instead of stopping operators.
    #[must_use]
    pub fn load(&self) -> OptionsSnapshot {
        match self.store.get::<OptionsData>(kind::OPTIONS, kind::OPTIONS_KEY) {
            Ok(Some(data)) => OptionsSnapshot::from_data(&data),
            Ok(None) => OptionsSnapshot::default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load options, using defaults");
                OptionsSnapshot::default()
            }
        }
    }
}

impl<S: Store> Clone for OptionsProvider<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_store::RocksStore;
    use tempfile::TempDir;

    #[test]
    fn missing_record_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let provider = OptionsProvider::new(store);
        let snapshot = provider.load();
        assert_eq!(snapshot.polling_frequency, 15);
    }

    #[test]
    fn stored_overrides_are_visible() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RocksStore::open(dir.path()).unwrap());
        let data = OptionsData {
            polling_frequency: Some(2),
            ..OptionsData::default()
        };
        store.put(kind::OPTIONS, kind::OPTIONS_KEY, &data).unwrap();

        let provider = OptionsProvider::new(store);
        assert_eq!(provider.load().polling_frequency, 2);
    }
}
