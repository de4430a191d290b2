//! Process-local commit log.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tracing::debug;

use crate::storage::commit::{CommitInfo, PendingCommit, RevisionRow};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::LogIndex;
use crate::storage::types::{CommitId, Key, StringId};
use crate::storage::CommitLog;

/// A commit log that lives only as long as the process.
///
/// Appends hold the write lock for the whole batch, so readers observe a
/// batch entirely or not at all.
#[derive(Debug, Default)]
pub struct MemoryLog {
    index: RwLock<LogIndex>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of commits written so far.
    pub fn commit_count(&self) -> usize {
        self.index.read().commit_count()
    }
}

impl CommitLog for MemoryLog {
    fn append(&self, batch: Vec<PendingCommit>) -> StorageResult<Vec<CommitInfo>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut index = self.index.write();
        let records = index.assign(batch);
        let infos: Vec<CommitInfo> = records.iter().map(|(info, _)| info.clone()).collect();

        index.apply_all(records)?;

        debug!(commits = infos.len(), next = %index.next_id(), "appended batch to memory log");
        Ok(infos)
    }

    fn latest_at(&self, key: &Key, asof: DateTime<Utc>) -> StorageResult<Vec<RevisionRow>> {
        Ok(self.index.read().latest_at(key, asof))
    }

    fn string_history(&self, key: &Key, id: &StringId) -> StorageResult<Vec<RevisionRow>> {
        Ok(self.index.read().string_history(key, id))
    }

    fn commits(&self, key: Option<&Key>) -> StorageResult<Vec<CommitInfo>> {
        Ok(self.index.read().commits(key))
    }

    fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.index
            .read()
            .get_commit(id)
            .ok_or(StorageError::CommitNotFound(id))
    }

    fn keys(&self) -> StorageResult<Vec<Key>> {
        Ok(self.index.read().keys())
    }
}
