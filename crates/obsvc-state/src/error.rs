//! Error types for obsvc-state

use thiserror::Error;

/// Errors raised by image configuration stores
#[derive(Error, Debug)]
pub enum StorageError {
    /// Concurrent saves kept moving the stored revision
    #[error("image configuration for {owner} changed concurrently; save not applied")]
    Conflict { owner: String },

    /// Database or transport failure
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Stored document could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Stored digest does not match the stored document
    #[error("stored configuration for {owner} is corrupt: digest {expected} != {actual}")]
    DigestMismatch {
        owner: String,
        expected: String,
        actual: String,
    },
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
