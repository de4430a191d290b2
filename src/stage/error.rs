//! Stage error types.

use thiserror::Error;

use crate::storage::StorageError;
use crate::working::WorkingSetError;

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Errors that can occur while rebasing or committing a stage.
#[derive(Debug, Error)]
pub enum StageError {
    /// Storage layer error; a failed commit wrote nothing.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A working set could not be rebuilt.
    #[error("working set error: {0}")]
    WorkingSet(#[from] WorkingSetError),
}

impl StageError {
    /// Check if retrying the whole stage may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StageError::Storage(e) if e.is_retriable())
    }
}
