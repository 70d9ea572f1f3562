//! In-process transactional store.

use super::staged::{apply_writes, scan, StagedTransaction};
use super::{KvRead, KvStore, Transaction};
use crate::error::StorageError;
use crate::types::{KeyKind, StorageKey};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;

/// Transactional map held entirely in memory.
///
/// Transactions are serialized against each other; plain reads never block
/// on an open transaction and only ever see committed data.
#[derive(Default)]
pub struct MemoryStore {
    /// Committed entries.
    data: RwLock<BTreeMap<StorageKey, Vec<u8>>>,

    /// Held for the whole lifetime of a write transaction.
    writer: Mutex<()>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed entries.
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvRead for MemoryStore {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn list(&self, kind: KeyKind) -> Result<BTreeMap<StorageKey, Vec<u8>>, StorageError> {
        Ok(scan(&self.data.read(), kind))
    }
}

impl KvStore for MemoryStore {
    fn put(&self, key: StorageKey, value: Vec<u8>) -> Result<(), StorageError> {
        self.transaction(|tx| tx.put(key, value))
    }

    fn delete(&self, keys: &[StorageKey]) -> Result<(), StorageError> {
        self.transaction(|tx| tx.delete(keys))
    }

    fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn Transaction) -> Result<T, E>,
        E: From<StorageError>,
    {
        let _writer = self.writer.lock();

        let (output, writes) = {
            let committed = self.data.read();
            let mut tx = StagedTransaction::new(&committed);
            let output = f(&mut tx)?;
            (output, tx.into_writes())
        };

        apply_writes(&mut self.data.write(), writes);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = MemoryStore::new();
        assert!(store.is_empty());

        store.put(StorageKey::DOC, b"doc".to_vec()).unwrap();
        store.put(StorageKey::Update(1), b"u1".to_vec()).unwrap();
        assert_eq!(store.get(&StorageKey::DOC).unwrap(), Some(b"doc".to_vec()));
        assert_eq!(store.len(), 2);

        store.delete(&[StorageKey::Update(1)]).unwrap();
        assert!(store.list(KeyKind::Update).unwrap().is_empty());
        assert_eq!(store.list(KeyKind::State).unwrap().len(), 1);
    }

    #[test]
    fn test_failed_transaction_discards_writes() {
        let store = MemoryStore::new();
        store.put(StorageKey::COUNT, vec![1]).unwrap();

        let result: Result<(), StorageError> = store.transaction(|tx| {
            tx.put(StorageKey::COUNT, vec![2])?;
            tx.put(StorageKey::Update(1), b"u1".to_vec())?;
            Err(StorageError::Backend("abort".into()))
        });

        assert!(result.is_err());
        assert_eq!(store.get(&StorageKey::COUNT).unwrap(), Some(vec![1]));
        assert_eq!(store.get(&StorageKey::Update(1)).unwrap(), None);
    }

    #[test]
    fn test_reads_outside_transaction_see_committed_data() {
        let store = MemoryStore::new();
        store.put(StorageKey::DOC, b"old".to_vec()).unwrap();

        store
            .transaction(|tx| {
                tx.put(StorageKey::DOC, b"new".to_vec())?;
                // Not yet visible outside.
                assert_eq!(store.get(&StorageKey::DOC)?, Some(b"old".to_vec()));
                Ok::<_, StorageError>(())
            })
            .unwrap();

        assert_eq!(store.get(&StorageKey::DOC).unwrap(), Some(b"new".to_vec()));
    }
}
