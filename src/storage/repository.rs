//!   Git-backed commit log.
//!
//!  This is the durable backend of the storage layer. It wraps
//!  `git2::Repository` with thread-safe access and keeps a `LogIndex` in
//!  memory, rebuilt by replaying the log ref when the repository is opened.
//!  Every read first compares the ref with the last commit the index has
//!  seen, so appends made through other handles are visible as soon as the
//!  ref moves.
//!
//!  Each append writes one Git commit whose tree holds a single
//!  `batch.json` blob; the log ref is moved last, with compare-and-swap.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use git2::{FileMode, ObjectType, Oid, Repository, Sort};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::storage::blob::{self, BATCH_FILE};
use crate::storage::commit::{CommitInfo, CommitMessage, PendingCommit, RevisionRow};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::index::LogIndex;
use crate::storage::refs::RefManager;
use crate::storage::types::{CommitId, Key, StringId};
use crate::storage::CommitLog;

/// git signature (author/committer info) recorded on batch commits
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitSignature {
    pub name: String,
    pub email: String,
}

impl GitSignature {
    /// create a new signature
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// default signature for stringdb operations
    pub fn stringdb() -> Self {
        Self::new("stringdb", "stringdb@localhost")
    }

    /// convert to a git2::Signature stamped at `at`
    pub(crate) fn to_git2_signature(
        &self,
        at: DateTime<Utc>,
    ) -> Result<git2::Signature<'static>, git2::Error> {
        let time = git2::Time::new(at.timestamp(), 0);
        git2::Signature::new(&self.name, &self.email, &time)
    }
}

impl Default for GitSignature {
    fn default() -> Self {
        Self::stringdb()
    }
}

/// The Git-backed commit log.
///
/// Clone this to share across threads - it uses Arc internally.
#[derive(Clone)]
pub struct GitLog {
    inner: Arc<GitLogInner>,
    signature: GitSignature,
}

struct GitLogInner {
    /// appends hold this for their whole duration
    repo: Mutex<RepoState>,
    index: RwLock<LogIndex>,
    path: PathBuf,
}

struct RepoState {
    repo: Repository,
    /// last log commit reflected in the index
    tip: Oid,
}

impl GitLog {
    /// Open an existing log.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo =
            Repository::open(path).map_err(|_| StorageError::NotInitialized(path.to_path_buf()))?;
        if !RefManager::exists(&repo) {
            return Err(StorageError::NotInitialized(path.to_path_buf()));
        }

        let tip = RefManager::tip(&repo)?;
        let mut index = LogIndex::new();
        let replayed = replay(&repo, tip, &mut index)?;
        info!(path = %path.display(), commits = replayed, "opened git log");

        Ok(Self::from_parts(repo, tip, index, path))
    }

    /// Initialize a new log, stamping the root commit with `clock`.
    pub fn init(path: impl AsRef<Path>, clock: &dyn Clock) -> StorageResult<Self> {
        let path = path.as_ref();
        let repo = Repository::init(path)?;
        let signature = GitSignature::stringdb();

        let root = {
            let tree_id = repo.treebuilder(None)?.write()?;
            let tree = repo.find_tree(tree_id)?;
            let sig = signature.to_git2_signature(clock.now())?;
            repo.commit(None, &sig, &sig, CommitMessage::initialize(), &tree, &[])?
        };
        RefManager::init_log_ref(&repo, root)?;
        info!(path = %path.display(), "initialized git log");

        Ok(Self::from_parts(repo, root, LogIndex::new(), path))
    }

    /// Open or initialize a log.
    pub fn open_or_init(path: impl AsRef<Path>, clock: &dyn Clock) -> StorageResult<Self> {
        let path = path.as_ref();
        if path.join(".git").exists() {
            Self::open(path)
        } else {
            Self::init(path, clock)
        }
    }

    fn from_parts(repo: Repository, tip: Oid, index: LogIndex, path: &Path) -> Self {
        Self {
            inner: Arc::new(GitLogInner {
                repo: Mutex::new(RepoState { repo, tip }),
                index: RwLock::new(index),
                path: path.to_path_buf(),
            }),
            signature: GitSignature::stringdb(),
        }
    }

    /// Set the signature for batch commits.
    pub fn with_signature(mut self, signature: GitSignature) -> Self {
        self.signature = signature;
        self
    }

    /// Get the repository path.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Pick up batches appended to the repository by other processes.
    ///
    /// Returns the number of commits added to the index.
    pub fn refresh(&self) -> StorageResult<usize> {
        let mut state = self.inner.repo.lock();
        self.catch_up(&mut state)
    }

    fn catch_up(&self, state: &mut RepoState) -> StorageResult<usize> {
        let tip = RefManager::tip(&state.repo)?;
        if tip == state.tip {
            return Ok(0);
        }

        let mut fresh = Vec::new();
        collect_batches(&state.repo, tip, Some(state.tip), &mut fresh)?;

        let applied = self.inner.index.write().apply_all(fresh)?;
        state.tip = tip;

        debug!(commits = applied, "caught up with external appends");
        Ok(applied)
    }

    /// Catch up with the log ref, then hand out the index for reading.
    fn synced(&self) -> StorageResult<RwLockReadGuard<'_, LogIndex>> {
        {
            let mut state = self.inner.repo.lock();
            self.catch_up(&mut state)?;
        }
        Ok(self.inner.index.read())
    }

    /// Get statistics about the log.
    pub fn stats(&self) -> LogStats {
        let index = self.inner.index.read();
        LogStats {
            commit_count: index.commit_count(),
            key_count: index.keys().len(),
            next_commit: index.next_id(),
        }
    }
}

impl CommitLog for GitLog {
    fn append(&self, batch: Vec<PendingCommit>) -> StorageResult<Vec<CommitInfo>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }

        let mut state = self.inner.repo.lock();
        self.catch_up(&mut state)?;

        let records = self.inner.index.read().assign(batch);
        let infos: Vec<CommitInfo> = records.iter().map(|(info, _)| info.clone()).collect();
        let committed_at = infos
            .iter()
            .map(|info| info.timestamp)
            .max()
            .unwrap_or_default();

        let parent = state.tip;
        let new_tip = {
            let repo = &state.repo;
            let blob_id = blob::write_batch(repo, &records)?;

            let mut builder = repo.treebuilder(None)?;
            builder.insert(BATCH_FILE, blob_id, FileMode::Blob.into())?;
            let tree = repo.find_tree(builder.write()?)?;

            let parent_commit = repo.find_commit(parent)?;
            let sig = self.signature.to_git2_signature(committed_at)?;
            let oid = repo.commit(
                None,
                &sig,
                &sig,
                &CommitMessage::batch(&infos),
                &tree,
                &[&parent_commit],
            )?;

            if let Err(e) = RefManager::advance(repo, parent, oid) {
                warn!(error = %e, "log ref update failed, batch discarded");
                return Err(e);
            }
            oid
        };

        self.inner.index.write().apply_all(records)?;
        state.tip = new_tip;

        debug!(
            commits = infos.len(),
            git_commit = %new_tip,
            "appended batch to git log"
        );
        Ok(infos)
    }

    fn latest_at(&self, key: &Key, asof: DateTime<Utc>) -> StorageResult<Vec<RevisionRow>> {
        Ok(self.synced()?.latest_at(key, asof))
    }

    fn string_history(&self, key: &Key, id: &StringId) -> StorageResult<Vec<RevisionRow>> {
        Ok(self.synced()?.string_history(key, id))
    }

    fn commits(&self, key: Option<&Key>) -> StorageResult<Vec<CommitInfo>> {
        Ok(self.synced()?.commits(key))
    }

    fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo> {
        self.synced()?
            .get_commit(id)
            .ok_or(StorageError::CommitNotFound(id))
    }

    fn keys(&self) -> StorageResult<Vec<Key>> {
        Ok(self.synced()?.keys())
    }
}

impl fmt::Debug for GitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitLog")
            .field("path", &self.inner.path)
            .field("signature", &self.signature)
            .finish()
    }
}

/// Replay the whole log up to `tip` into `index`.
fn replay(repo: &Repository, tip: Oid, index: &mut LogIndex) -> StorageResult<usize> {
    let mut records = Vec::new();
    collect_batches(repo, tip, None, &mut records)?;
    index.apply_all(records)
}

/// Read every batch between `since` (exclusive) and `tip`, oldest first.
fn collect_batches(
    repo: &Repository,
    tip: Oid,
    since: Option<Oid>,
    out: &mut Vec<(CommitInfo, Vec<RevisionRow>)>,
) -> StorageResult<()> {
    let mut revwalk = repo.revwalk()?;
    revwalk.push(tip)?;
    if let Some(since) = since {
        revwalk.hide(since)?;
    }
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::REVERSE)?;

    for oid in revwalk {
        let commit = repo.find_commit(oid?)?;
        let tree = commit.tree()?;

        // the root commit carries no batch
        let Some(entry) = tree.get_name(BATCH_FILE) else {
            continue;
        };
        if entry.kind() != Some(ObjectType::Blob) {
            return Err(StorageError::CorruptedData {
                path: PathBuf::from(format!("{}/{}", commit.id(), BATCH_FILE)),
                reason: format!("expected blob, found {:?}", entry.kind()),
            });
        }

        let bytes = blob::read_blob(repo, entry.id())?;
        out.extend(blob::deserialize_batch(&bytes)?);
    }

    Ok(())
}

/// Statistics about the log.
#[derive(Debug, Clone)]
pub struct LogStats {
    pub commit_count: usize,
    pub key_count: usize,
    pub next_commit: CommitId,
}

impl fmt::Display for LogStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Log Statistics:")?;
        writeln!(f, "  Commits: {}", self.commit_count)?;
        writeln!(f, "  Keys: {}", self.key_count)?;
        writeln!(f, "  Next Commit: {}", self.next_commit)
    }
}
