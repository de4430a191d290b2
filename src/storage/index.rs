//! In-memory index over the commit log.
//!
//! Every backend keeps one of these, updated after each successful append
//! (and rebuilt by replay when a durable log is opened). Per (key, string id)
//! it keeps the revision rows sorted by `(timestamp, commit id)`, so the
//! "latest row at or before T" query is a binary search per string instead
//! of a scan over the whole history.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::storage::commit::{CommitInfo, PendingCommit, RevisionRow};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, Key, StringId};

#[derive(Debug, Default)]
pub(crate) struct LogIndex {
    commits: BTreeMap<CommitId, CommitInfo>,
    rows: BTreeMap<Key, BTreeMap<StringId, Vec<RevisionRow>>>,
    last_id: Option<CommitId>,
}

impl LogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// the id the next appended commit will receive
    pub fn next_id(&self) -> CommitId {
        self.last_id.map(|id| id.next()).unwrap_or(CommitId::FIRST)
    }

    /// Assign ids to a batch without touching the index.
    pub fn assign(&self, batch: Vec<PendingCommit>) -> Vec<(CommitInfo, Vec<RevisionRow>)> {
        let mut id = self.next_id();
        let mut records = Vec::with_capacity(batch.len());
        for pending in batch {
            records.push(pending.into_records(id));
            id = id.next();
        }
        records
    }

    /// Record a run of committed commits and their rows.
    ///
    /// Ids must be strictly increasing and newer than anything already
    /// applied. The whole run is checked first; on error the index is
    /// left unchanged.
    pub fn apply_all(
        &mut self,
        records: Vec<(CommitInfo, Vec<RevisionRow>)>,
    ) -> StorageResult<usize> {
        let mut last = self.last_id;
        for (info, _) in &records {
            if let Some(last) = last {
                if info.id <= last {
                    return Err(StorageError::Internal(format!(
                        "commit {} applied after {}",
                        info.id, last
                    )));
                }
            }
            last = Some(info.id);
        }

        let count = records.len();
        for (info, rows) in records {
            self.insert(info, rows);
        }
        Ok(count)
    }

    fn insert(&mut self, info: CommitInfo, rows: Vec<RevisionRow>) {
        for row in rows {
            let history = self
                .rows
                .entry(row.key.clone())
                .or_default()
                .entry(row.string_id.clone())
                .or_default();
            let at = history.partition_point(|r| r.order() <= row.order());
            history.insert(at, row);
        }

        self.last_id = Some(info.id);
        self.commits.insert(info.id, info);
    }

    /// Latest row per string id under `key` with `timestamp <= asof`.
    ///
    /// Deletion rows are returned as well; ordering is ascending by id.
    pub fn latest_at(&self, key: &Key, asof: DateTime<Utc>) -> Vec<RevisionRow> {
        let Some(strings) = self.rows.get(key) else {
            return Vec::new();
        };

        strings
            .values()
            .filter_map(|history| {
                let visible = history.partition_point(|r| r.timestamp <= asof);
                history[..visible].last().cloned()
            })
            .collect()
    }

    pub fn string_history(&self, key: &Key, id: &StringId) -> Vec<RevisionRow> {
        self.rows
            .get(key)
            .and_then(|strings| strings.get(id))
            .cloned()
            .unwrap_or_default()
    }

    /// commits, newest first, optionally restricted to one key
    pub fn commits(&self, key: Option<&Key>) -> Vec<CommitInfo> {
        self.commits
            .values()
            .rev()
            .filter(|info| key.map_or(true, |k| &info.key == k))
            .cloned()
            .collect()
    }

    pub fn get_commit(&self, id: CommitId) -> Option<CommitInfo> {
        self.commits.get(&id).cloned()
    }

    pub fn keys(&self) -> Vec<Key> {
        self.rows.keys().cloned().collect()
    }

    pub fn commit_count(&self) -> usize {
        self.commits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::commit::CommitBuilder;
    use chrono::{Duration, TimeZone};

    fn key() -> Key {
        Key::parse("app", "de", "main").unwrap()
    }

    fn sid(s: &str) -> StringId {
        StringId::new(s).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn append(index: &mut LogIndex, at: DateTime<Utc>, revs: &[(&str, Option<&str>, bool)]) {
        let mut builder = CommitBuilder::new(key(), at).message("test");
        for (id, text, deleted) in revs {
            builder = builder.revision(sid(id), text.map(str::to_string), *deleted, None);
        }
        let records = index.assign(vec![builder.build()]);
        index.apply_all(records).unwrap();
    }

    #[test]
    fn test_latest_at_respects_time_bound() {
        let mut index = LogIndex::new();
        append(&mut index, t0(), &[("a", Some("one"), false)]);
        append(&mut index, t0() + Duration::hours(1), &[("a", Some("two"), false)]);

        let before = index.latest_at(&key(), t0() - Duration::seconds(1));
        assert!(before.is_empty());

        let first = index.latest_at(&key(), t0() + Duration::minutes(30));
        assert_eq!(first[0].text.as_deref(), Some("one"));

        let second = index.latest_at(&key(), t0() + Duration::hours(2));
        assert_eq!(second[0].text.as_deref(), Some("two"));
    }

    #[test]
    fn test_identical_timestamps_resolved_by_commit_id() {
        let mut index = LogIndex::new();
        append(&mut index, t0(), &[("a", Some("first"), false)]);
        append(&mut index, t0(), &[("a", Some("second"), false)]);

        let rows = index.latest_at(&key(), t0());
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text.as_deref(), Some("second"));
        assert_eq!(rows[0].commit_id, CommitId::new(2));
    }

    #[test]
    fn test_backdated_revision_sorted_into_place() {
        let mut index = LogIndex::new();
        append(&mut index, t0() + Duration::hours(1), &[("a", Some("new"), false)]);

        // a later commit carrying an older explicit timestamp
        let pending = CommitBuilder::new(key(), t0() + Duration::hours(2))
            .revision(sid("a"), Some("old".into()), false, Some(t0()))
            .build();
        let records = index.assign(vec![pending]);
        index.apply_all(records).unwrap();

        let history = index.string_history(&key(), &sid("a"));
        assert_eq!(history[0].text.as_deref(), Some("old"));
        assert_eq!(history[1].text.as_deref(), Some("new"));
        assert_eq!(
            index.latest_at(&key(), t0() + Duration::hours(3))[0].text.as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_commits_newest_first_and_ids_monotonic() {
        let mut index = LogIndex::new();
        assert_eq!(index.next_id(), CommitId::FIRST);
        append(&mut index, t0(), &[("a", Some("x"), false)]);
        append(&mut index, t0(), &[("b", Some("y"), false)]);

        let commits = index.commits(Some(&key()));
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0].id, CommitId::new(2));
        assert_eq!(index.next_id(), CommitId::new(3));
        assert_eq!(index.keys(), vec![key()]);
    }

    #[test]
    fn test_out_of_order_apply_rejected() {
        let mut index = LogIndex::new();
        append(&mut index, t0(), &[("a", Some("x"), false)]);

        let stale = CommitBuilder::new(key(), t0()).build();
        assert!(matches!(
            index.apply_all(vec![stale.into_records(CommitId::FIRST)]),
            Err(StorageError::Internal(_))
        ));
    }

    #[test]
    fn test_rejected_run_leaves_index_unchanged() {
        let mut index = LogIndex::new();
        let good = CommitBuilder::new(key(), t0())
            .revision(sid("a"), Some("A".into()), false, None)
            .build();
        let repeated = CommitBuilder::new(key(), t0())
            .revision(sid("b"), Some("B".into()), false, None)
            .build();
        let run = vec![
            good.into_records(CommitId::new(1)),
            repeated.into_records(CommitId::new(1)),
        ];

        assert!(index.apply_all(run).is_err());
        assert_eq!(index.commit_count(), 0);
        assert!(index.keys().is_empty());
        assert_eq!(index.next_id(), CommitId::FIRST);

        // a valid retry still applies cleanly
        append(&mut index, t0(), &[("a", Some("A"), false)]);
        assert_eq!(index.commit_count(), 1);
    }
}
