//! Grow-only set engine.

use super::CrdtEngine;
use crate::error::CrdtError;
use std::collections::BTreeSet;

/// Engine whose documents are sets of strings merged by union.
///
/// Updates and encoded state share one format: a MessagePack array of
/// strings. A one-element update of a two-byte string is exactly four bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct GrowOnlySet;

impl GrowOnlySet {
    pub fn new() -> Self {
        Self
    }

    /// Encode a delta adding `items`.
    pub fn update<I, S>(items: I) -> Vec<u8>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = items.into_iter().map(Into::into).collect();
        // A Vec<String> always serializes.
        rmp_serde::to_vec(&items).unwrap_or_default()
    }
}

impl CrdtEngine for GrowOnlySet {
    type Document = BTreeSet<String>;

    fn create_empty(&self) -> Self::Document {
        BTreeSet::new()
    }

    fn apply(&self, doc: &mut Self::Document, update: &[u8]) -> Result<(), CrdtError> {
        let items: Vec<String> =
            rmp_serde::from_slice(update).map_err(|e| CrdtError::Decode(e.to_string()))?;
        doc.extend(items);
        Ok(())
    }

    fn encode(&self, doc: &Self::Document) -> Result<Vec<u8>, CrdtError> {
        rmp_serde::to_vec(doc).map_err(|e| CrdtError::Encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_four_byte_update() {
        assert_eq!(GrowOnlySet::update(["ab"]).len(), 4);
    }

    #[test]
    fn test_apply_is_commutative_and_idempotent() {
        let engine = GrowOnlySet::new();
        let a = GrowOnlySet::update(["a", "b"]);
        let b = GrowOnlySet::update(["c"]);

        let mut left = engine.create_empty();
        engine.apply(&mut left, &a).unwrap();
        engine.apply(&mut left, &b).unwrap();

        let mut right = engine.create_empty();
        engine.apply(&mut right, &b).unwrap();
        engine.apply(&mut right, &a).unwrap();
        engine.apply(&mut right, &a).unwrap();

        assert_eq!(left, right);
    }

    #[test]
    fn test_encoded_state_is_an_update() {
        let engine = GrowOnlySet::new();
        let mut doc = engine.create_empty();
        engine.apply(&mut doc, &GrowOnlySet::update(["x", "y"])).unwrap();

        let snapshot = engine.encode(&doc).unwrap();
        let mut restored = engine.create_empty();
        engine.apply(&mut restored, &snapshot).unwrap();
        assert_eq!(restored, doc);
    }

    #[test]
    fn test_rejects_garbage() {
        let engine = GrowOnlySet::new();
        let mut doc = engine.create_empty();
        let result = engine.apply(&mut doc, &[0xc1, 0x00]);
        assert!(matches!(result, Err(CrdtError::Decode(_))));
    }
}
