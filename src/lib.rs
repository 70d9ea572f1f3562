//! # Delta Journal
//!
//! Persists an append-only stream of CRDT deltas behind a transactional
//! key-value store, folding the stream into a single snapshot whenever the
//! pending log grows past a byte or count threshold.
//!
//! ## Core Concepts
//!
//! - **Snapshot**: full encoded document state as of the last compaction
//! - **Pending deltas**: updates appended since then, keyed `update/<seq>`
//! - **Counters**: pending byte and record totals, kept in the same
//!   transaction as the records they describe
//! - **Ports**: storage ([`KvStore`]) and merge logic ([`CrdtEngine`]) are
//!   injected, so backends can be swapped without touching compaction
//!
//! ## Example
//!
//! ```ignore
//! use delta_journal::{DocumentStore, GrowOnlySet, MemoryStore, StoreConfig};
//!
//! let store = DocumentStore::new(MemoryStore::new(), GrowOnlySet::new(), StoreConfig {
//!     max_updates: 100,
//!     ..Default::default()
//! });
//!
//! store.store_update(&GrowOnlySet::update(["hello"]))?;
//! store.commit()?;
//!
//! let doc = store.get_document()?;
//! assert!(doc.contains("hello"));
//! ```

pub mod crdt;
pub mod error;
pub mod storage;
pub mod store;
pub mod types;

// Re-exports
pub use crdt::{CrdtEngine, GrowOnlySet};
pub use error::{Cause, CrdtError, Result, StorageError, StoreError};
pub use storage::{FileStore, KvRead, KvStore, MemoryStore, StagedTransaction, Transaction};
pub use store::{DocumentStore, StoreConfig};
pub use types::{KeyKind, PendingStats, StateSlot, StorageKey};
