//! The stage: uncommitted working sets and the rebase/commit logic.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::clock::Clock;
use crate::snapshot::SnapshotReader;
use crate::stage::error::StageResult;
use crate::storage::{CommitBuilder, CommitInfo, CommitLog, CommitMetadata, Key, PendingCommit};
use crate::working::{differs, StringRevision, WorkingSet};

/// A batch of working sets waiting to be committed.
///
/// Stages are never persisted; they exist for the duration of one staging
/// operation. Committing does not clear the stage.
pub struct Stage {
    sets: BTreeMap<Key, WorkingSet>,
    log: Arc<dyn CommitLog>,
    clock: Arc<dyn Clock>,
    reader: SnapshotReader,
}

impl Stage {
    pub fn new(log: Arc<dyn CommitLog>, clock: Arc<dyn Clock>) -> Self {
        let reader = SnapshotReader::new(log.clone(), clock.clone());
        Self {
            sets: BTreeMap::new(),
            log,
            clock,
            reader,
        }
    }

    /// Stage a working set, merging into any set already staged for its key.
    ///
    /// Revisions in `ws` replace staged revisions with the same id.
    pub fn add(&mut self, ws: WorkingSet) {
        match self.sets.get_mut(ws.key()) {
            Some(existing) => existing.merge(ws),
            None => {
                self.sets.insert(ws.key().clone(), ws);
            }
        }
    }

    pub fn has_component(&self, key: &Key) -> bool {
        self.sets.contains_key(key)
    }

    pub fn get_component(&self, key: &Key) -> Option<&WorkingSet> {
        self.sets.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.sets.keys()
    }

    pub fn len(&self) -> usize {
        self.sets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn clear(&mut self) {
        self.sets.clear();
    }

    /// Reduce every staged set to its changes against the latest commit.
    ///
    /// Ids whose content matches the committed value are dropped. Ids that
    /// are committed but not staged are ignored, unless `delete_missing` is
    /// set, in which case the staged set is a full replacement and each of
    /// them gets a deletion revision. Keys stay staged even when their set
    /// ends up empty.
    ///
    /// Either every key is rebased or, on a storage error, none is.
    pub fn rebase(&mut self, delete_missing: bool) -> StageResult<()> {
        let now = self.clock.now();
        let mut rebased = Vec::with_capacity(self.sets.len());

        for (key, staged) in &self.sets {
            let current = self.reader.from_snapshot(key, now)?;
            let mut result = WorkingSet::new(key.clone());

            for revision in staged {
                let changed = match current.get(revision.id().as_str()) {
                    Some(committed) => differs(revision, committed),
                    None => true,
                };
                if changed {
                    result.add(revision.clone(), true)?;
                }
            }

            let mut deletions = 0;
            if delete_missing {
                for committed in &current {
                    if !staged.has(Some(committed.id().as_str())) {
                        result.add(StringRevision::deleted(committed.id().clone()), true)?;
                        deletions += 1;
                    }
                }
            }

            debug!(
                key = %key,
                staged = staged.len(),
                kept = result.len() - deletions,
                deletions,
                "rebased working set"
            );
            rebased.push(result);
        }

        for ws in rebased {
            self.sets.insert(ws.key().clone(), ws);
        }
        Ok(())
    }

    /// Commit every non-empty staged set as one atomic batch.
    ///
    /// With `rebase_first`, the stage is rebased (without synthesizing
    /// deletions) before anything is written. Each non-empty key yields one
    /// commit; revisions without an explicit timestamp get the commit time.
    /// Returns the written commits, which is empty when there was nothing to
    /// write.
    pub fn commit(
        &mut self,
        message: impl Into<String>,
        metadata: CommitMetadata,
        rebase_first: bool,
    ) -> StageResult<Vec<CommitInfo>> {
        if rebase_first {
            self.rebase(false)?;
        }

        let message = message.into();
        let committed_at = self.clock.now();
        let batch: Vec<PendingCommit> = self
            .sets
            .values()
            .filter(|ws| !ws.is_empty())
            .map(|ws| {
                let mut builder = CommitBuilder::new(ws.key().clone(), committed_at)
                    .message(message.as_str())
                    .metadata(metadata.clone());
                for revision in ws {
                    builder = builder.revision(
                        revision.id().clone(),
                        revision.text().map(str::to_string),
                        revision.is_deleted(),
                        revision.timestamp(),
                    );
                }
                builder.build()
            })
            .collect();

        if batch.is_empty() {
            debug!("stage has no changes, nothing committed");
            return Ok(Vec::new());
        }

        let infos = self.log.append(batch)?;
        info!(
            commits = infos.len(),
            revisions = infos.iter().map(|c| c.revision_count).sum::<usize>(),
            author = metadata.author.as_deref().unwrap_or("-"),
            "committed stage"
        );
        Ok(infos)
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage").field("sets", &self.sets).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::stage::StageError;
    use crate::storage::{
        CommitId, MemoryLog, RevisionRow, StorageError, StorageResult, StringId,
    };
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn key() -> Key {
        Key::parse("browser", "fr", "main").unwrap()
    }

    fn other_key() -> Key {
        Key::parse("browser", "de", "main").unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn sid(s: &str) -> StringId {
        StringId::new(s).unwrap()
    }

    fn setup() -> (Arc<MemoryLog>, ManualClock) {
        (Arc::new(MemoryLog::new()), ManualClock::new(t0()))
    }

    fn stage(log: &Arc<MemoryLog>, clock: &ManualClock) -> Stage {
        Stage::new(log.clone(), Arc::new(clock.clone()))
    }

    fn working_set(key: Key, entries: &[(&str, &str)]) -> WorkingSet {
        let mut ws = WorkingSet::new(key);
        for (id, text) in entries {
            ws.add_text(id, *text).unwrap();
        }
        ws
    }

    fn seed(log: &Arc<MemoryLog>, clock: &ManualClock) {
        let mut s = stage(log, clock);
        s.add(working_set(
            key(),
            &[("one", "One"), ("two", "Two"), ("three", "Tree")],
        ));
        s.commit("seed", CommitMetadata::new(), false).unwrap();
        clock.advance(Duration::minutes(1));
    }

    #[test]
    fn test_add_merges_same_key() {
        let (log, clock) = setup();
        let mut s = stage(&log, &clock);

        s.add(working_set(key(), &[("a", "A"), ("b", "B")]));
        s.add(working_set(key(), &[("b", "B2"), ("c", "C")]));
        s.add(working_set(other_key(), &[("a", "A")]));

        assert_eq!(s.len(), 2);
        let ws = s.get_component(&key()).unwrap();
        assert_eq!(ws.len(), 3);
        assert_eq!(ws.get("b").unwrap().text(), Some("B2"));
        assert!(s.has_component(&other_key()));

        s.clear();
        assert!(s.is_empty());
        assert!(s.get_component(&key()).is_none());
    }

    #[test]
    fn test_rebase_keeps_only_changes() {
        let (log, clock) = setup();
        seed(&log, &clock);

        let mut s = stage(&log, &clock);
        s.add(working_set(
            key(),
            &[("one", "One"), ("two", "Two"), ("three", "Three")],
        ));
        s.rebase(false).unwrap();

        let ws = s.get_component(&key()).unwrap();
        let ids: Vec<&str> = ws.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["three"]);
        assert_eq!(ws.get("three").unwrap().text(), Some("Three"));
    }

    #[test]
    fn test_rebase_delete_missing() {
        let (log, clock) = setup();
        seed(&log, &clock);

        let mut s = stage(&log, &clock);
        s.add(working_set(key(), &[("one", "One"), ("three", "Three")]));
        s.rebase(true).unwrap();

        let ws = s.get_component(&key()).unwrap();
        let ids: Vec<&str> = ws.ids().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["three", "two"]);
        assert!(ws.get("two").unwrap().is_deleted());
        assert_eq!(ws.get("three").unwrap().text(), Some("Three"));
    }

    #[test]
    fn test_rebase_partial_patch_ignores_missing() {
        let (log, clock) = setup();
        seed(&log, &clock);

        let mut s = stage(&log, &clock);
        s.add(working_set(key(), &[("four", "Four")]));
        s.rebase(false).unwrap();

        let ws = s.get_component(&key()).unwrap();
        assert_eq!(ws.len(), 1);
        assert!(ws.has(Some("four")));
    }

    #[test]
    fn test_rebase_whitespace_only_change_dropped() {
        let (log, clock) = setup();
        seed(&log, &clock);

        let mut s = stage(&log, &clock);
        s.add(working_set(key(), &[("one", "  One  ")]));
        s.rebase(false).unwrap();

        assert!(s.has_component(&key()));
        assert!(s.get_component(&key()).unwrap().is_empty());
    }

    #[test]
    fn test_commit_rebase_first_identical_is_noop() {
        let (log, clock) = setup();
        seed(&log, &clock);
        let before = log.commit_count();

        let mut s = stage(&log, &clock);
        s.add(working_set(
            key(),
            &[("one", "One"), ("two", "Two"), ("three", "Tree")],
        ));
        let written = s.commit("no-op", CommitMetadata::new(), true).unwrap();

        assert!(written.is_empty());
        assert_eq!(log.commit_count(), before);
    }

    #[test]
    fn test_commit_rebase_first_writes_only_changes() {
        let (log, clock) = setup();
        seed(&log, &clock);

        let mut s = stage(&log, &clock);
        s.add(working_set(
            key(),
            &[("one", "One"), ("two", "Two"), ("three", "Three")],
        ));
        let written = s
            .commit("fix typo", CommitMetadata::new().author("bob"), true)
            .unwrap();

        assert_eq!(written.len(), 1);
        assert_eq!(written[0].revision_count, 1);
        assert_eq!(written[0].metadata.author.as_deref(), Some("bob"));

        let rows = log.string_history(&key(), &sid("three")).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(log.string_history(&key(), &sid("one")).unwrap().len(), 1);
    }

    #[test]
    fn test_commit_one_commit_per_nonempty_key() {
        let (log, clock) = setup();
        let mut s = stage(&log, &clock);

        s.add(working_set(key(), &[("a", "A")]));
        s.add(working_set(other_key(), &[("a", "A")]));
        s.add(WorkingSet::new(Key::parse("mail", "fr", "main").unwrap()));

        let written = s.commit("import", CommitMetadata::new(), false).unwrap();
        assert_eq!(written.len(), 2);
        // keys are committed in key order
        assert_eq!(written[0].key, other_key());
        assert_eq!(written[1].key, key());
        assert_eq!(written[0].id, CommitId::new(1));
        assert_eq!(written[1].id, CommitId::new(2));

        // the stage is left as it was
        assert_eq!(s.len(), 3);
    }

    #[test]
    fn test_commit_empty_stage_is_noop() {
        let (log, clock) = setup();
        let mut s = stage(&log, &clock);
        assert!(s.commit("nothing", CommitMetadata::new(), false).unwrap().is_empty());

        s.add(WorkingSet::new(key()));
        assert!(s.commit("nothing", CommitMetadata::new(), false).unwrap().is_empty());
        assert_eq!(log.commit_count(), 0);
    }

    #[test]
    fn test_commit_timestamps() {
        let (log, clock) = setup();
        let mut s = stage(&log, &clock);
        let backdated = t0() - Duration::days(30);

        let mut ws = WorkingSet::new(key());
        ws.add(StringRevision::new(sid("now"), "Now"), false).unwrap();
        ws.add(StringRevision::new(sid("old"), "Old").at(backdated), false)
            .unwrap();
        s.add(ws);
        let written = s.commit("import", CommitMetadata::new(), false).unwrap();
        assert_eq!(written[0].timestamp, t0());

        let now_rows = log.string_history(&key(), &sid("now")).unwrap();
        let old_rows = log.string_history(&key(), &sid("old")).unwrap();
        assert_eq!(now_rows[0].timestamp, t0());
        assert_eq!(old_rows[0].timestamp, backdated);
    }

    #[test]
    fn test_rebase_keeps_empty_over_absent() {
        let (log, clock) = setup();
        let mut s = stage(&log, &clock);
        let mut ws = WorkingSet::new(key());
        ws.add(StringRevision::absent(sid("x")), false).unwrap();
        s.add(ws);
        s.commit("absent", CommitMetadata::new(), false).unwrap();
        clock.advance(Duration::seconds(1));

        let mut s = stage(&log, &clock);
        let mut ws = WorkingSet::new(key());
        ws.add(StringRevision::new(sid("x"), ""), false).unwrap();
        s.add(ws);
        s.rebase(false).unwrap();

        assert_eq!(
            s.get_component(&key()).unwrap().get("x").unwrap().text(),
            Some("")
        );
    }

    /// A log whose appends always fail.
    struct FailingLog {
        inner: MemoryLog,
    }

    impl CommitLog for FailingLog {
        fn append(&self, _batch: Vec<PendingCommit>) -> StorageResult<Vec<CommitInfo>> {
            Err(StorageError::Internal("disk full".to_string()))
        }

        fn latest_at(&self, key: &Key, asof: DateTime<Utc>) -> StorageResult<Vec<RevisionRow>> {
            self.inner.latest_at(key, asof)
        }

        fn string_history(&self, key: &Key, id: &StringId) -> StorageResult<Vec<RevisionRow>> {
            self.inner.string_history(key, id)
        }

        fn commits(&self, key: Option<&Key>) -> StorageResult<Vec<CommitInfo>> {
            self.inner.commits(key)
        }

        fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
            self.inner.get_commit(id)
        }

        fn keys(&self) -> StorageResult<Vec<Key>> {
            self.inner.keys()
        }
    }

    #[test]
    fn test_failed_commit_writes_nothing() {
        let log = Arc::new(FailingLog {
            inner: MemoryLog::new(),
        });
        let clock = ManualClock::new(t0());
        let mut s = Stage::new(log.clone(), Arc::new(clock.clone()));
        s.add(working_set(key(), &[("a", "A")]));
        s.add(working_set(other_key(), &[("a", "A")]));

        let err = s.commit("boom", CommitMetadata::new(), false).unwrap_err();
        assert!(matches!(err, StageError::Storage(StorageError::Internal(_))));
        assert!(log.commits(None).unwrap().is_empty());
        assert_eq!(s.get_component(&key()).unwrap().len(), 1);
    }
}
