//! Storage ports and bundled backends.
//!
//! The document store only talks to storage through these traits. A backend
//! provides plain reads and writes plus a `transaction` that runs a closure
//! with atomic, isolated visibility: either every write staged by the closure
//! becomes visible, or none does.

mod file;
mod memory;
mod staged;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use staged::StagedTransaction;

use crate::error::StorageError;
use crate::types::{KeyKind, StorageKey};
use std::collections::BTreeMap;

/// Read access shared by stores and open transactions.
pub trait KvRead {
    /// Fetch a single value.
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError>;

    /// Fetch every entry whose key belongs to `kind`.
    ///
    /// Callers must not rely on the iteration order.
    fn list(&self, kind: KeyKind) -> Result<BTreeMap<StorageKey, Vec<u8>>, StorageError>;
}

/// Scoped handle passed to a transaction closure.
///
/// Offers no way to open a nested transaction.
pub trait Transaction: KvRead {
    fn put(&mut self, key: StorageKey, value: Vec<u8>) -> Result<(), StorageError>;

    fn delete(&mut self, keys: &[StorageKey]) -> Result<(), StorageError>;
}

/// Transactional key-value store.
pub trait KvStore: KvRead + Send + Sync {
    fn put(&self, key: StorageKey, value: Vec<u8>) -> Result<(), StorageError>;

    fn delete(&self, keys: &[StorageKey]) -> Result<(), StorageError>;

    /// Run `f` inside one atomic unit of work.
    ///
    /// Writes staged through the handle are published only if `f` returns
    /// `Ok`. An `Err` from `f`, or a failure while publishing, leaves
    /// previously committed state untouched.
    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StorageError>;
}

impl<S: KvStore> KvRead for std::sync::Arc<S> {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn list(&self, kind: KeyKind) -> Result<BTreeMap<StorageKey, Vec<u8>>, StorageError> {
        (**self).list(kind)
    }
}

impl<S: KvStore> KvStore for std::sync::Arc<S> {
    fn put(&self, key: StorageKey, value: Vec<u8>) -> Result<(), StorageError> {
        (**self).put(key, value)
    }

    fn delete(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
        (**self).delete(keys)
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        (**self).transaction(f)
    }
}
