//! Core types: the key scheme and counter values.

use crate::error::StorageError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reserved names under the `state` namespace.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum StateSlot {
    /// Encoded snapshot of the full document.
    Doc,
    /// Sum of pending delta byte lengths.
    Bytes,
    /// Number of pending delta records.
    Count,
}

impl StateSlot {
    pub fn name(self) -> &'static str {
        match self {
            StateSlot::Doc => "doc",
            StateSlot::Bytes => "bytes",
            StateSlot::Count => "count",
        }
    }
}

/// Key namespace, used as the prefix for scans.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum KeyKind {
    State,
    Update,
}

impl KeyKind {
    pub fn prefix(self) -> &'static str {
        match self {
            KeyKind::State => "state",
            KeyKind::Update => "update",
        }
    }
}

/// Composite `(kind, name)` storage key.
///
/// Pending deltas live under `update/<seq>` where `seq` starts at 1 after
/// every compaction.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StorageKey {
    State(StateSlot),
    Update(u64),
}

impl StorageKey {
    pub const DOC: StorageKey = StorageKey::State(StateSlot::Doc);
    pub const BYTES: StorageKey = StorageKey::State(StateSlot::Bytes);
    pub const COUNT: StorageKey = StorageKey::State(StateSlot::Count);

    pub fn kind(&self) -> KeyKind {
        match self {
            StorageKey::State(_) => KeyKind::State,
            StorageKey::Update(_) => KeyKind::Update,
        }
    }

    /// Every key in `kind` sorts within `first..=last`.
    pub(crate) fn range_of(kind: KeyKind) -> (StorageKey, StorageKey) {
        match kind {
            KeyKind::State => (StorageKey::DOC, StorageKey::COUNT),
            KeyKind::Update => (StorageKey::Update(0), StorageKey::Update(u64::MAX)),
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = self.kind().prefix();
        match self {
            StorageKey::State(slot) => write!(f, "{}/{}", prefix, slot.name()),
            StorageKey::Update(seq) => write!(f, "{}/{}", prefix, seq),
        }
    }
}

impl fmt::Debug for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}

impl FromStr for StorageKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StorageError::InvalidFormat(format!("Invalid storage key: {}", s));

        let (kind, name) = s.split_once('/').ok_or_else(invalid)?;
        match (kind, name) {
            ("state", "doc") => Ok(StorageKey::DOC),
            ("state", "bytes") => Ok(StorageKey::BYTES),
            ("state", "count") => Ok(StorageKey::COUNT),
            ("update", seq) => seq.parse().map(StorageKey::Update).map_err(|_| invalid()),
            _ => Err(invalid()),
        }
    }
}

/// Current values of the pending-delta counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingStats {
    /// Sum of byte lengths of pending delta records.
    pub bytes: u64,
    /// Number of pending delta records.
    pub count: u64,
}

/// Encode a counter value for storage.
pub(crate) fn encode_counter(value: u64) -> Result<Vec<u8>, StorageError> {
    Ok(rmp_serde::to_vec(&value)?)
}

/// Decode a stored counter, treating an absent value as zero.
pub(crate) fn decode_counter(value: Option<Vec<u8>>) -> Result<u64, StorageError> {
    match value {
        Some(bytes) => Ok(rmp_serde::from_slice(&bytes)?),
        None => Ok(0),
    }
}
