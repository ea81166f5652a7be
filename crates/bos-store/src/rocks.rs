//! `RocksDB` storage implementation.
//!
//! Records are CBOR-encoded documents, one column family per kind. The
//! [`Store::patch`] implementation runs inside an optimistic transaction:
//! the record is read with a conflict marker, mutated, written, and the
//! commit is retried from the read if another writer got there first.

use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, Direction, ErrorKind, IteratorMode,
    MultiThreaded, OptimisticTransactionDB, Options,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::kind;
use crate::Store;

/// RocksDB-backed store.
pub struct RocksStore {
    db: Arc<OptimisticTransactionDB<MultiThreaded>>,
}

impl RocksStore {
    /// Open or create the database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = kind::all_kinds()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = OptimisticTransactionDB::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Unavailable(format!("column family not found: {name}")))
    }

    /// Serialize a record using CBOR.
    fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a record from CBOR.
    fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl Store for RocksStore {
    fn get<T: DeserializeOwned>(&self, kind: &str, key: &str) -> Result<Option<T>> {
        let cf = self.cf(kind)?;
        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .map(|data| Self::decode(&data))
            .transpose()
    }

    fn put<T: Serialize>(&self, kind: &str, key: &str, value: &T) -> Result<()> {
        let cf = self.cf(kind)?;
        let bytes = Self::encode(value)?;
        self.db
            .put_cf(&cf, key, bytes)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn patch<T, F>(&self, kind: &str, key: &str, mut mutate: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut(&mut T),
    {
        let cf = self.cf(kind)?;
        loop {
            let txn = self.db.transaction();
            let bytes = txn
                .get_for_update_cf(&cf, key, true)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?
                .ok_or(StoreError::NotFound)?;
            let mut record: T = Self::decode(&bytes)?;
            mutate(&mut record);
            let updated = Self::encode(&record)?;
            txn.put_cf(&cf, key, updated)
                .map_err(|e| StoreError::Unavailable(e.to_string()))?;
            match txn.commit() {
                Ok(()) => return Ok(record),
                Err(e) if matches!(e.kind(), ErrorKind::Busy | ErrorKind::TryAgain) => {
                    // Lost the race; re-read and re-apply the mutator.
                    continue;
                }
                Err(e) => return Err(StoreError::Unavailable(e.to_string())),
            }
        }
    }

    fn delete(&self, kind: &str, key: &str) -> Result<()> {
        let cf = self.cf(kind)?;
        if !self.contains(kind, key)? {
            return Err(StoreError::NotFound);
        }
        self.db
            .delete_cf(&cf, key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }

    fn contains(&self, kind: &str, key: &str) -> Result<bool> {
        let cf = self.cf(kind)?;
        Ok(self
            .db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?
            .is_some())
    }

    fn list_keys(&self, kind: &str, prefix: &str) -> Result<Vec<String>> {
        let cf = self.cf(kind)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix.as_bytes(), Direction::Forward)
        };

        let mut keys = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, _) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    fn scan<T, P>(
        &self,
        kind: &str,
        prefix: &str,
        mut predicate: P,
        page_size: usize,
    ) -> Result<Vec<Vec<T>>>
    where
        T: DeserializeOwned,
        P: FnMut(&T) -> bool,
    {
        let cf = self.cf(kind)?;
        let mode = if prefix.is_empty() {
            IteratorMode::Start
        } else {
            IteratorMode::From(prefix.as_bytes(), Direction::Forward)
        };

        let mut pages: Vec<Vec<T>> = Vec::new();
        let mut page: Vec<T> = Vec::new();
        for item in self.db.iterator_cf(&cf, mode) {
            let (key, value) = item.map_err(|e| StoreError::Unavailable(e.to_string()))?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            let record: T = Self::decode(&value)?;
            if !predicate(&record) {
                continue;
            }
            page.push(record);
            if page_size > 0 && page.len() == page_size {
                pages.push(std::mem::take(&mut page));
            }
        }
        if !page.is_empty() {
            pages.push(page);
        }
        Ok(pages)
    }
}
