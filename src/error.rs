//! Error types for the delta journal.

use thiserror::Error;

/// Failures raised by a storage backend.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store already exists: {0}")]
    AlreadyExists(String),

    #[error("Journal entry too large: {len} bytes (limit {max})")]
    EntryTooLarge { len: usize, max: usize },

    #[error("Backend error: {0}")]
    Backend(String),
}

impl From<rmp_serde::encode::Error> for StorageError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StorageError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StorageError::Deserialization(e.to_string())
    }
}

/// Failures raised by a CRDT engine.
#[derive(Debug, Error)]
pub enum CrdtError {
    #[error("Cannot decode update: {0}")]
    Decode(String),

    #[error("Cannot encode document: {0}")]
    Encode(String),
}

/// Underlying failure attached to an assembly or commit error.
#[derive(Debug, Error)]
pub enum Cause {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Crdt(#[from] CrdtError),
}

/// Main error type for document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Reading the snapshot or pending deltas, or merging them, failed.
    #[error("Failed to assemble document")]
    Assembly(#[source] Cause),

    /// The scan/delete/apply/encode/write sequence of a compaction failed.
    #[error("Failed to commit snapshot")]
    Commit(#[source] Cause),

    /// Counter or record access failed on the plain append path.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl StoreError {
    /// The wrapped failure, when this is an assembly or commit error.
    pub fn cause(&self) -> Option<&Cause> {
        match self {
            StoreError::Assembly(cause) | StoreError::Commit(cause) => Some(cause),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}

/// Result type for document store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_commit_error_keeps_cause() {
        let err = StoreError::Commit(Cause::Crdt(CrdtError::Encode("boom".into())));
        assert_eq!(err.to_string(), "Failed to commit snapshot");

        let source = err.source().unwrap();
        assert_eq!(source.to_string(), "Cannot encode document: boom");
        assert!(matches!(err.cause(), Some(Cause::Crdt(CrdtError::Encode(_)))));
    }

    #[test]
    fn test_storage_error_has_no_cause() {
        let err = StoreError::from(StorageError::Locked);
        assert!(err.cause().is_none());
    }
}
