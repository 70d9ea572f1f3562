//! CRDT engine port.
//!
//! The store never interprets delta bytes itself. It relies on the engine's
//! `apply` being commutative and idempotent: pending deltas are applied in
//! no particular order, and compaction may apply the same delta twice.

mod set;

pub use set::GrowOnlySet;

use crate::error::CrdtError;

/// Capability to build, merge and serialize documents.
pub trait CrdtEngine: Send + Sync {
    /// In-memory document type.
    type Document;

    /// A document with no content.
    fn create_empty(&self) -> Self::Document;

    /// Merge an encoded update into `doc` in place.
    fn apply(&self, doc: &mut Self::Document, update: &[u8]) -> Result<(), CrdtError>;

    /// Encode the full state of `doc` as a single update.
    fn encode(&self, doc: &Self::Document) -> Result<Vec<u8>, CrdtError>;
}

impl<E: CrdtEngine> CrdtEngine for std::sync::Arc<E> {
    type Document = E::Document;

    fn create_empty(&self) -> Self::Document {
        (**self).create_empty()
    }

    fn apply(&self, doc: &mut Self::Document, update: &[u8]) -> Result<(), CrdtError> {
        (**self).apply(doc, update)
    }

    fn encode(&self, doc: &Self::Document) -> Result<Vec<u8>, CrdtError> {
        (**self).encode(doc)
    }
}
