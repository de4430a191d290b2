//! Point-in-time reconstruction of working sets.
//!
//! A snapshot is log compaction: for every string ever written under a
//! key, keep the last revision at or before the time bound and drop the
//! string if that revision is a deletion. The log's index answers the
//! "latest row per string" part; this module applies the deletion rule and
//! builds working sets, diffs and histories on top of it.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::storage::{
    Change, ChangeStatus, CommitInfo, CommitLog, Key, RevisionRow, StorageResult, StringId,
};
use crate::working::{differs, StringRevision, WorkingSet};

/// Reads snapshots out of a commit log.
#[derive(Clone)]
pub struct SnapshotReader {
    log: Arc<dyn CommitLog>,
    clock: Arc<dyn Clock>,
}

impl SnapshotReader {
    pub fn new(log: Arc<dyn CommitLog>, clock: Arc<dyn Clock>) -> Self {
        Self { log, clock }
    }

    /// The state of `key` as of `asof`.
    pub fn from_snapshot(&self, key: &Key, asof: DateTime<Utc>) -> StorageResult<WorkingSet> {
        let rows = self.log.latest_at(key, asof)?;
        let live = rows
            .into_iter()
            .filter(|row| !row.deleted)
            .map(StringRevision::from);
        Ok(WorkingSet::from_revisions(key.clone(), live))
    }

    /// The state of `key` right now.
    pub fn latest(&self, key: &Key) -> StorageResult<WorkingSet> {
        self.from_snapshot(key, self.clock.now())
    }

    /// Per-string changes between the snapshots at `from` and `to`.
    pub fn diff(
        &self,
        key: &Key,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StorageResult<Vec<Change>> {
        let old = self.from_snapshot(key, from)?;
        let new = self.from_snapshot(key, to)?;

        let ids: BTreeSet<&StringId> = old.ids().chain(new.ids()).collect();
        let changes = ids
            .into_iter()
            .filter_map(|id| {
                let status = match (old.get(id.as_str()), new.get(id.as_str())) {
                    (None, Some(_)) => ChangeStatus::Added,
                    (Some(_), None) => ChangeStatus::Deleted,
                    (Some(a), Some(b)) if differs(a, b) => ChangeStatus::Modified,
                    _ => return None,
                };
                Some(Change {
                    id: id.clone(),
                    status,
                })
            })
            .collect();

        Ok(changes)
    }

    /// Every revision of one string, oldest first.
    pub fn string_history(&self, key: &Key, id: &StringId) -> StorageResult<Vec<RevisionRow>> {
        self.log.string_history(key, id)
    }

    /// Commits touching `key`, newest first.
    pub fn history(&self, key: &Key) -> StorageResult<Vec<CommitInfo>> {
        self.log.commits(Some(key))
    }

    /// Every key with recorded history.
    pub fn keys(&self) -> StorageResult<Vec<Key>> {
        self.log.keys()
    }
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader")
            .field("now", &self.clock.now())
            .finish()
    }
}
