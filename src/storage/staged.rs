//! Write overlay shared by the bundled backends.

use super::{KvRead, Transaction};
use crate::error::StorageError;
use crate::types::{KeyKind, StorageKey};
use std::collections::BTreeMap;

/// Staged change for one key: `Some` is a put, `None` a delete.
pub(crate) type Writes = BTreeMap<StorageKey, Option<Vec<u8>>>;

/// Transaction handle that buffers writes on top of committed data.
///
/// Reads see committed data overlaid with this transaction's own writes.
pub struct StagedTransaction<'a> {
    committed: &'a BTreeMap<StorageKey, Vec<u8>>,
    writes: Writes,
}

impl<'a> StagedTransaction<'a> {
    pub(crate) fn new(committed: &'a BTreeMap<StorageKey, Vec<u8>>) -> Self {
        Self {
            committed,
            writes: BTreeMap::new(),
        }
    }

    pub(crate) fn into_writes(self) -> Writes {
        self.writes
    }
}

impl KvRead for StagedTransaction<'_> {
    fn get(&self, key: &StorageKey) -> Result<Option<Vec<u8>>, StorageError> {
        match self.writes.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => Ok(self.committed.get(key).cloned()),
        }
    }

    fn list(&self, kind: KeyKind) -> Result<BTreeMap<StorageKey, Vec<u8>>, StorageError> {
        let mut entries = scan(self.committed, kind);

        let (first, last) = StorageKey::range_of(kind);
        for (key, staged) in self.writes.range(first..=last) {
            match staged {
                Some(value) => {
                    entries.insert(*key, value.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }

        Ok(entries)
    }
}

impl Transaction for StagedTransaction<'_> {
    fn put(&mut self, key: StorageKey, value: Vec<u8>) -> Result<(), StorageError> {
        self.writes.insert(key, Some(value));
        Ok(())
    }

    fn delete(&mut self, keys: &[StorageKey]) -> Result<(), StorageError> {
        for key in keys {
            self.writes.insert(*key, None);
        }
        Ok(())
    }
}

/// Copy every committed entry of `kind`.
pub(crate) fn scan(
    data: &BTreeMap<StorageKey, Vec<u8>>,
    kind: KeyKind,
) -> BTreeMap<StorageKey, Vec<u8>> {
    let (first, last) = StorageKey::range_of(kind);
    data.range(first..=last)
        .map(|(key, value)| (*key, value.clone()))
        .collect()
}

/// Publish staged writes into committed data.
pub(crate) fn apply_writes(data: &mut BTreeMap<StorageKey, Vec<u8>>, writes: Writes) {
    for (key, staged) in writes {
        match staged {
            Some(value) => {
                data.insert(key, value);
            }
            None => {
                data.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn committed() -> BTreeMap<StorageKey, Vec<u8>> {
        let mut data = BTreeMap::new();
        data.insert(StorageKey::DOC, b"snap".to_vec());
        data.insert(StorageKey::Update(1), b"one".to_vec());
        data.insert(StorageKey::Update(2), b"two".to_vec());
        data
    }

    #[test]
    fn test_reads_see_own_writes() {
        let data = committed();
        let mut tx = StagedTransaction::new(&data);

        tx.put(StorageKey::Update(3), b"three".to_vec()).unwrap();
        tx.delete(&[StorageKey::Update(1)]).unwrap();

        assert_eq!(tx.get(&StorageKey::Update(3)).unwrap(), Some(b"three".to_vec()));
        assert_eq!(tx.get(&StorageKey::Update(1)).unwrap(), None);
        assert_eq!(tx.get(&StorageKey::DOC).unwrap(), Some(b"snap".to_vec()));

        let updates = tx.list(KeyKind::Update).unwrap();
        let keys: Vec<_> = updates.keys().copied().collect();
        assert_eq!(keys, vec![StorageKey::Update(2), StorageKey::Update(3)]);

        // Committed data is untouched until the writes are published.
        assert_eq!(data.len(), 3);
    }

    #[test]
    fn test_apply_writes() {
        let mut data = committed();
        let writes = {
            let mut tx = StagedTransaction::new(&data);
            tx.delete(&[StorageKey::Update(1), StorageKey::Update(2)]).unwrap();
            tx.put(StorageKey::COUNT, vec![0]).unwrap();
            tx.into_writes()
        };

        apply_writes(&mut data, writes);

        assert!(scan(&data, KeyKind::Update).is_empty());
        assert_eq!(scan(&data, KeyKind::State).len(), 2);
    }
}
