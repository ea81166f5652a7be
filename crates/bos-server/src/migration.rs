//! Startup migration and record sanitization.
//!
//! Runs before the server accepts traffic. The store's format version
//! gates startup: an empty store is stamped with the current version,
//! the current version passes, anything else is a fatal error. Every
//! record is then checked against the current schema; records whose
//! tenant disagrees with their key are rewritten, records that do not
//! decode are deleted with a logged reason.

use serde_json::Value;
use thiserror::Error;

use bos_core::split_key;
use bos_store::types::{
    Component, Session, SessionTemplate, StoreVersion, CURRENT_STORE_VERSION,
};
use bos_store::{kind, Store, StoreError};

/// Migration failures.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The store was written by an incompatible version.
    #[error("store format version {found} is not supported (this build reads version {supported})")]
    UnsupportedVersion {
        /// The version found in the store.
        found: u32,
        /// The version this build supports.
        supported: u32,
    },

    /// The store failed during migration.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// What a migration pass did.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct MigrationSummary {
    /// Records rewritten into the current shape.
    pub repaired: usize,
    /// Records deleted as unrepairable.
    pub deleted: usize,
}

/// Run the version gate and sanitization pass.
///
/// # Errors
///
/// Fails when the store version is unsupported or the store errors.
pub fn run<S: Store>(store: &S) -> Result<MigrationSummary, MigrationError> {
    match store.get::<StoreVersion>(kind::META, kind::VERSION_KEY)? {
        None => {
            store.put(
                kind::META,
                kind::VERSION_KEY,
                &StoreVersion {
                    version: CURRENT_STORE_VERSION,
                },
            )?;
            tracing::info!(version = CURRENT_STORE_VERSION, "stamped new store");
        }
        Some(StoreVersion { version }) if version == CURRENT_STORE_VERSION => {}
        Some(StoreVersion { version }) => {
            return Err(MigrationError::UnsupportedVersion {
                found: version,
                supported: CURRENT_STORE_VERSION,
            });
        }
    }

    let mut summary = MigrationSummary::default();
    sanitize_kind::<S, Component>(store, kind::COMPONENTS, &mut summary)?;
    sanitize_kind::<S, Session>(store, kind::SESSIONS, &mut summary)?;
    sanitize_kind::<S, SessionTemplate>(store, kind::SESSION_TEMPLATES, &mut summary)?;

    if summary.repaired > 0 || summary.deleted > 0 {
        tracing::info!(
            repaired = summary.repaired,
            deleted = summary.deleted,
            "store sanitization complete"
        );
    }
    Ok(summary)
}

/// A record type that knows its tenant, so sanitization can reconcile
/// the stored tenant with the key prefix.
trait Tenanted: serde::de::DeserializeOwned + serde::Serialize {
    fn tenant_mut(&mut self) -> &mut bos_core::Tenant;
}

impl Tenanted for Component {
    fn tenant_mut(&mut self) -> &mut bos_core::Tenant {
        &mut self.tenant
    }
}
impl Tenanted for Session {
    fn tenant_mut(&mut self) -> &mut bos_core::Tenant {
        &mut self.tenant
    }
}
impl Tenanted for SessionTemplate {
    fn tenant_mut(&mut self) -> &mut bos_core::Tenant {
        &mut self.tenant
    }
}

fn sanitize_kind<S: Store, T: Tenanted>(
    store: &S,
    record_kind: &str,
    summary: &mut MigrationSummary,
) -> Result<(), StoreError> {
    for key in store.list_keys(record_kind, "")? {
        // Read the raw document first so an unparsable record can be
        // reported and removed instead of poisoning every later scan.
        let Some(raw) = store.get::<Value>(record_kind, &key)? else {
            continue;
        };
        match serde_json::from_value::<T>(raw.clone()) {
            Ok(mut record) => {
                let Some((key_tenant, _)) = split_key(&key) else {
                    tracing::warn!(kind = record_kind, key = %key,
                        "deleting record with malformed key");
                    store.delete(record_kind, &key)?;
                    summary.deleted += 1;
                    continue;
                };
                if *record.tenant_mut() != key_tenant {
                    *record.tenant_mut() = key_tenant;
                    store.put(record_kind, &key, &record)?;
                    summary.repaired += 1;
                    tracing::info!(kind = record_kind, key = %key,
                        "normalized record tenant from key");
                }
            }
            Err(e) => {
                tracing::warn!(kind = record_kind, key = %key, error = %e,
                    "deleting record that does not match the current schema");
                store.delete(record_kind, &key)?;
                summary.deleted += 1;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bos_core::Tenant;
    use bos_store::RocksStore;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (RocksStore, TempDir) {
        let dir = TempDir::new().unwrap();
        (RocksStore::open(dir.path()).unwrap(), dir)
    }

    #[test]
    fn empty_store_is_stamped() {
        let (store, _dir) = store();
        run(&store).unwrap();
        let version: StoreVersion = store.get(kind::META, kind::VERSION_KEY).unwrap().unwrap();
        assert_eq!(version.version, CURRENT_STORE_VERSION);
        // Idempotent.
        run(&store).unwrap();
    }

    #[test]
    fn unsupported_version_is_fatal() {
        let (store, _dir) = store();
        store
            .put(kind::META, kind::VERSION_KEY, &StoreVersion { version: 1 })
            .unwrap();
        let result = run(&store);
        assert!(matches!(
            result,
            Err(MigrationError::UnsupportedVersion { found: 1, .. })
        ));
    }

    #[test]
    fn missing_tenant_is_normalized_from_key() {
        let (store, _dir) = store();
        // A record with no tenant field at all, keyed under a tenant.
        let raw = json!({"id": "x1", "enabled": true});
        store.put(kind::COMPONENTS, "blue/x1", &raw).unwrap();

        let summary = run(&store).unwrap();
        assert_eq!(summary.repaired, 1);
        assert_eq!(summary.deleted, 0);

        let component: Component = store.get(kind::COMPONENTS, "blue/x1").unwrap().unwrap();
        assert_eq!(component.tenant, Tenant::from("blue"));
        assert!(component.enabled);
    }

    #[test]
    fn invalid_phase_deletes_the_record() {
        let (store, _dir) = store();
        let raw = json!({
            "id": "x1",
            "tenant": "",
            "status": {"phase": "warming_up"}
        });
        store.put(kind::COMPONENTS, "/x1", &raw).unwrap();

        let summary = run(&store).unwrap();
        assert_eq!(summary.deleted, 1);
        assert!(!store.contains(kind::COMPONENTS, "/x1").unwrap());
    }

    #[test]
    fn valid_records_pass_untouched() {
        let (store, _dir) = store();
        let component = Component::new("x1", Tenant::untenanted());
        store
            .put(kind::COMPONENTS, &component.key(), &component)
            .unwrap();

        let summary = run(&store).unwrap();
        assert_eq!(summary, MigrationSummary::default());
        assert!(store.contains(kind::COMPONENTS, &component.key()).unwrap());
    }
}
