//! Document store tying storage and the CRDT engine together.

use crate::crdt::CrdtEngine;
use crate::error::{Cause, Result, StoreError};
use crate::storage::{KvRead, KvStore, Transaction};
use crate::types::{decode_counter, encode_counter, KeyKind, PendingStats, StorageKey};
use serde::Deserialize;

/// Compaction thresholds.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Pending bytes allowed before an append compacts instead.
    pub max_bytes: u64,

    /// Pending deltas allowed before an append compacts instead.
    pub max_updates: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_bytes: 1024 * 1024,
            max_updates: 500,
        }
    }
}

impl StoreConfig {
    /// Parse a JSON config; missing fields keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// What started a compaction, for logging.
#[derive(Clone, Copy, Debug)]
enum Trigger {
    Threshold,
    Explicit,
}

/// Append-only delta log with snapshot compaction.
///
/// Layout in the backing store:
/// - `state/doc`: encoded snapshot (absent until the first compaction)
/// - `state/bytes`, `state/count`: pending-delta counters (absent means 0)
/// - `update/<seq>`: pending deltas, `seq` restarting at 1 after compaction
///
/// Every path that touches the counters also touches the records they
/// describe, inside the same storage transaction.
pub struct DocumentStore<S, E> {
    store: S,
    engine: E,
    config: StoreConfig,
}

impl<S: KvStore, E: CrdtEngine> DocumentStore<S, E> {
    pub fn new(store: S, engine: E, config: StoreConfig) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Rebuild the current document from the snapshot plus pending deltas.
    pub fn get_document(&self) -> Result<E::Document> {
        self.assemble(&self.store).map_err(StoreError::Assembly)
    }

    /// Persist a delta, compacting instead when it would cross a threshold.
    ///
    /// When compacting, the delta is merged straight into the new snapshot
    /// and never written as a pending record.
    pub fn store_update(&self, update: &[u8]) -> Result<()> {
        self.store.transaction(|tx| {
            let bytes = decode_counter(tx.get(&StorageKey::BYTES)?)?;
            let count = decode_counter(tx.get(&StorageKey::COUNT)?)?;

            let new_bytes = bytes.saturating_add(update.len() as u64);
            let new_count = count.saturating_add(1);

            if new_bytes > self.config.max_bytes || new_count > self.config.max_updates {
                let mut doc = self.assemble(&*tx).map_err(StoreError::Assembly)?;
                self.engine
                    .apply(&mut doc, update)
                    .map_err(|e| StoreError::Assembly(e.into()))?;
                return self.compact_in(tx, doc, Trigger::Threshold);
            }

            tx.put(StorageKey::Update(new_count), update.to_vec())?;
            tx.put(StorageKey::BYTES, encode_counter(new_bytes)?)?;
            tx.put(StorageKey::COUNT, encode_counter(new_count)?)?;

            tracing::debug!(
                seq = new_count,
                len = update.len(),
                pending_bytes = new_bytes,
                "appended delta"
            );
            Ok(())
        })
    }

    /// Fold every pending delta into a fresh snapshot.
    pub fn commit(&self) -> Result<()> {
        self.store.transaction(|tx| {
            let doc = self.assemble(&*tx).map_err(StoreError::Assembly)?;
            self.compact_in(tx, doc, Trigger::Explicit)
        })
    }

    /// Current pending-delta counters.
    pub fn pending_stats(&self) -> Result<PendingStats> {
        self.store.transaction(|tx| {
            Ok(PendingStats {
                bytes: decode_counter(tx.get(&StorageKey::BYTES)?)?,
                count: decode_counter(tx.get(&StorageKey::COUNT)?)?,
            })
        })
    }

    /// Raw bytes of the last snapshot, if any compaction has happened.
    pub fn snapshot(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.store.get(&StorageKey::DOC)?)
    }

    fn assemble<R: KvRead + ?Sized>(&self, reader: &R) -> std::result::Result<E::Document, Cause> {
        let snapshot = reader.get(&StorageKey::DOC)?;
        let updates = reader.list(KeyKind::Update)?;

        let mut doc = self.engine.create_empty();
        if let Some(snapshot) = &snapshot {
            self.engine.apply(&mut doc, snapshot)?;
        }
        for update in updates.values() {
            self.engine.apply(&mut doc, update)?;
        }

        tracing::debug!(
            snapshot_len = snapshot.as_ref().map_or(0, Vec::len),
            pending = updates.len(),
            "assembled document"
        );
        Ok(doc)
    }

    /// Replace the snapshot with `doc` merged with every pending delta and
    /// reset the counters, all within `tx`.
    ///
    /// Pending deltas are re-read here even if `doc` already contains them;
    /// applying a delta twice is a no-op for a conforming engine.
    fn compact_in(
        &self,
        tx: &mut dyn Transaction,
        mut doc: E::Document,
        trigger: Trigger,
    ) -> Result<()> {
        let (folded, snapshot_len) = self
            .fold_pending(tx, &mut doc)
            .map_err(StoreError::Commit)?;

        tracing::info!(?trigger, folded, snapshot_len, "compacted pending deltas");
        Ok(())
    }

    fn fold_pending(
        &self,
        tx: &mut dyn Transaction,
        doc: &mut E::Document,
    ) -> std::result::Result<(usize, usize), Cause> {
        let updates = tx.list(KeyKind::Update)?;

        let keys: Vec<StorageKey> = updates.keys().copied().collect();
        tx.delete(&keys)?;

        for update in updates.values() {
            self.engine.apply(doc, update)?;
        }

        let snapshot = self.engine.encode(doc)?;
        let snapshot_len = snapshot.len();
        tx.put(StorageKey::BYTES, encode_counter(0)?)?;
        tx.put(StorageKey::COUNT, encode_counter(0)?)?;
        tx.put(StorageKey::DOC, snapshot)?;

        Ok((updates.len(), snapshot_len))
    }
}
