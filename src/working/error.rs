//! Working set error types.

use thiserror::Error;

use crate::storage::{InvalidNameError, Key, StringId};

/// Result type for working set operations.
pub type WorkingSetResult<T> = Result<T, WorkingSetError>;

/// Errors raised while building a working set.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkingSetError {
    /// An id or key token failed validation.
    #[error("validation error: {0}")]
    Validation(#[from] InvalidNameError),

    /// A non-overwriting add hit an id that is already present.
    #[error("duplicate string id {id} in {key}")]
    DuplicateKey { key: Key, id: StringId },
}

impl WorkingSetError {
    pub fn is_duplicate(&self) -> bool {
        matches!(self, WorkingSetError::DuplicateKey { .. })
    }
}
