//! Keyed document store for the boot orchestration service.
//!
//! Every record the service persists — components, sessions, session
//! templates, options, referral tokens — lives in this store as a single
//! CBOR-encoded document under a tenant-prefixed key, one column family
//! per record kind.
//!
//! The store deliberately offers no cross-record transactions. The one
//! safety primitive everything else is built on is [`Store::patch`]: an
//! atomic read-modify-write of a single record, retried on concurrent
//! modification. Operators express their updates as pure functions of the
//! record they read, so any interleaving of patches is a serialization of
//! the submitted mutators.
//!
//! # Example
//!
//! ```no_run
//! use bos_store::{kind, RocksStore, Store};
//! use bos_store::types::Component;
//! use bos_core::Tenant;
//!
//! let store = RocksStore::open("/var/lib/bos-db").unwrap();
//! let key = Tenant::untenanted().key_for("x1000c0s0b0n0");
//! store
//!     .patch(kind::COMPONENTS, &key, |c: &mut Component| {
//!         c.enabled = true;
//!     })
//!     .unwrap();
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod kind;
pub mod rocks;
pub mod types;

pub use error::{Result, StoreError};
pub use rocks::RocksStore;

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The storage contract all other components depend on.
///
/// Implementations must make [`Store::patch`] atomic per key: concurrent
/// patches against the same key behave as if executed one after another.
pub trait Store: Send + Sync {
    /// Fetch a record; `None` on miss.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable or the stored bytes
    /// do not decode.
    fn get<T: DeserializeOwned>(&self, kind: &str, key: &str) -> Result<Option<T>>;

    /// Fetch several records at once; missing keys are simply absent from
    /// the result map.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    fn get_multi<T: DeserializeOwned>(
        &self,
        kind: &str,
        keys: &[String],
    ) -> Result<HashMap<String, T>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get(kind, key)? {
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    /// Insert or replace a record.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    fn put<T: Serialize>(&self, kind: &str, key: &str, value: &T) -> Result<()>;

    /// Atomically read, mutate and write back a single record, returning
    /// the record as written. Retries internally when another writer
    /// commits between the read and the write.
    ///
    /// The mutator must be a pure function of the record it is given; it
    /// may run more than once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the key does not exist, or a
    /// store-unavailable error.
    fn patch<T, F>(&self, kind: &str, key: &str, mutate: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T);

    /// Remove a record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the key does not exist.
    fn delete(&self, kind: &str, key: &str) -> Result<()>;

    /// True when the key exists.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    fn contains(&self, kind: &str, key: &str) -> Result<bool>;

    /// All keys under the given prefix, in key order.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable.
    fn list_keys(&self, kind: &str, prefix: &str) -> Result<Vec<String>>;

    /// Scan records under a prefix, keeping those matching the predicate,
    /// returned as pages of at most `page_size` records. A `page_size` of
    /// zero yields everything in a single page. An empty prefix scans the
    /// whole kind across all tenants.
    ///
    /// # Errors
    ///
    /// Returns an error when the store is unavailable or a record fails
    /// to decode.
    fn scan<T, P>(
        &self,
        kind: &str,
        prefix: &str,
        predicate: P,
        page_size: usize,
    ) -> Result<Vec<Vec<T>>>
    where
        T: DeserializeOwned,
        P: FnMut(&T) -> bool;
}
