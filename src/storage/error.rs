//! Storage layer error types
//!
//! All errors that can occur while reading or appending to the commit log
//! are defined here. We use `thiserror` for ergonomic error definition.

use std::path::PathBuf;

use thiserror::Error;

use crate::storage::types::{CommitId, InvalidNameError};

/// the main error type for storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// error from the underlying Git library
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    /// a persisted token failed validation
    #[error("invalid name: {0}")]
    InvalidName(#[from] InvalidNameError),

    /// JSON serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// data integrity check failed
    #[error("corrupted data at {path}: {reason}")]
    CorruptedData { path: PathBuf, reason: String },

    /// repo is not initialized
    #[error("repository not initialized: {0}")]
    NotInitialized(PathBuf),

    /// the commit was not found
    #[error("commit not found: {0}")]
    CommitNotFound(CommitId),

    /// the log ref moved while an append was in flight
    #[error("concurrent modification: {reference} was updated by another writer")]
    ConcurrentModification { reference: String },

    /// internal error that shouldn't happen
    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    /// check if this error indicates the resource doesn't exist
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::CommitNotFound(_) | StorageError::NotInitialized(_)
        )
    }

    /// check if this error is recoverable by retrying the whole append
    pub fn is_retriable(&self) -> bool {
        matches!(self, StorageError::ConcurrentModification { .. })
    }
}

/// result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;
