//! Database API - high-level interface for stringdb.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::info;

use crate::clock::{Clock, SystemClock};
use crate::snapshot::SnapshotReader;
use crate::stage::{Stage, StageError};
use crate::storage::{
    CommitInfo, CommitLog, CommitMetadata, GitLog, GitSignature, Key, MemoryLog, StorageError,
};
use crate::working::WorkingSet;

/// Result type for database operations.
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Database errors.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("stage error: {0}")]
    Stage(#[from] StageError),

    #[error("database not found: {0}")]
    NotFound(PathBuf),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Database configuration options.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the repository directory; `None` keeps everything in memory.
    pub path: Option<PathBuf>,
    /// Create if doesn't exist.
    pub create_if_missing: bool,
    /// Author recorded on the Git commits of a durable log.
    pub signature: GitSignature,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from(".stringdb")),
            create_if_missing: true,
            signature: GitSignature::default(),
        }
    }
}

impl DatabaseConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }

    /// Configuration for a process-local, non-durable database.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            ..Default::default()
        }
    }

    /// Set create_if_missing flag.
    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Set the Git author name and email.
    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.signature = GitSignature::new(name, email);
        self
    }
}

/// The main database handle.
///
/// Cloning is cheap; clones share the log and the clock.
#[derive(Clone)]
pub struct Database {
    config: DatabaseConfig,
    log: Arc<dyn CommitLog>,
    git: Option<GitLog>,
    clock: Arc<dyn Clock>,
}

impl Database {
    /// Open or create a database at the given path.
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        Self::open_with_config(DatabaseConfig::new(path.as_ref()))
    }

    /// Open or create a database with custom configuration.
    pub fn open_with_config(config: DatabaseConfig) -> DatabaseResult<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    /// Open or create a database whose every timestamp comes from `clock`,
    /// including the root commit of a newly created log.
    pub fn open_with_clock(config: DatabaseConfig, clock: Arc<dyn Clock>) -> DatabaseResult<Self> {
        let Some(path) = config.path.clone() else {
            return Ok(Self::from_log(config, Arc::new(MemoryLog::new()), None).with_clock(clock));
        };

        if path.as_os_str().is_empty() {
            return Err(DatabaseError::InvalidConfig(
                "database path cannot be empty".into(),
            ));
        }

        let log = if config.create_if_missing {
            GitLog::open_or_init(&path, clock.as_ref())?
        } else if path.exists() {
            GitLog::open(&path)?
        } else {
            return Err(DatabaseError::NotFound(path));
        };
        let log = log.with_signature(config.signature.clone());

        info!(path = %log.path().display(), "database opened");
        Ok(Self::from_log(config, Arc::new(log.clone()), Some(log)).with_clock(clock))
    }

    /// Create a new in-memory database.
    pub fn in_memory() -> Self {
        Self::from_log(DatabaseConfig::in_memory(), Arc::new(MemoryLog::new()), None)
    }

    /// Wrap an existing log, e.g. a custom backend.
    pub fn with_log(log: Arc<dyn CommitLog>) -> Self {
        Self::from_log(DatabaseConfig::in_memory(), log, None)
    }

    fn from_log(config: DatabaseConfig, log: Arc<dyn CommitLog>, git: Option<GitLog>) -> Self {
        Self {
            config,
            log,
            git,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the time source used for commits and "now" reads.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Start a new, empty stage.
    pub fn stage(&self) -> Stage {
        Stage::new(self.log.clone(), self.clock.clone())
    }

    /// Get a snapshot reader over this database.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader::new(self.log.clone(), self.clock.clone())
    }

    /// The state of `key` as of `asof`.
    pub fn snapshot(&self, key: &Key, asof: DateTime<Utc>) -> DatabaseResult<WorkingSet> {
        Ok(self.reader().from_snapshot(key, asof)?)
    }

    /// The current state of `key`.
    pub fn latest(&self, key: &Key) -> DatabaseResult<WorkingSet> {
        Ok(self.reader().latest(key)?)
    }

    /// Stage, rebase and commit a single working set.
    ///
    /// With `replace`, ids missing from `ws` are deleted; otherwise `ws` is
    /// applied as a patch.
    pub fn import(
        &self,
        ws: WorkingSet,
        message: impl Into<String>,
        metadata: CommitMetadata,
        replace: bool,
    ) -> DatabaseResult<Vec<CommitInfo>> {
        let mut stage = self.stage();
        stage.add(ws);
        stage.rebase(replace)?;
        Ok(stage.commit(message, metadata, false)?)
    }

    /// Commits, newest first, optionally restricted to one key.
    pub fn history(&self, key: Option<&Key>) -> DatabaseResult<Vec<CommitInfo>> {
        Ok(self.log.commits(key)?)
    }

    /// Every key with recorded history.
    pub fn keys(&self) -> DatabaseResult<Vec<Key>> {
        Ok(self.log.keys()?)
    }

    /// Pick up commits written by other processes (durable logs only).
    pub fn refresh(&self) -> DatabaseResult<usize> {
        match &self.git {
            Some(git) => Ok(git.refresh()?),
            None => Ok(0),
        }
    }

    /// Get database statistics.
    pub fn stats(&self) -> DatabaseResult<DatabaseStats> {
        Ok(DatabaseStats {
            commits: self.log.commits(None)?.len(),
            keys: self.log.keys()?.len(),
            durable: self.git.is_some(),
        })
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .field("durable", &self.git.is_some())
            .finish()
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub commits: usize,
    pub keys: usize,
    pub durable: bool,
}

impl fmt::Display for DatabaseStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Database Statistics:")?;
        writeln!(f, "  Commits: {}", self.commits)?;
        writeln!(f, "  Keys: {}", self.keys)?;
        writeln!(
            f,
            "  Backend: {}",
            if self.durable { "git" } else { "memory" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, TimeZone};
    use tempfile::TempDir;

    fn key() -> Key {
        Key::parse("browser", "fr", "main").unwrap()
    }

    fn strings(entries: &[(&str, &str)]) -> WorkingSet {
        let mut ws = WorkingSet::new(key());
        for (id, text) in entries {
            ws.add_text(id, *text).unwrap();
        }
        ws
    }

    #[test]
    fn test_in_memory_import_and_snapshot() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let db = Database::in_memory().with_clock(Arc::new(clock.clone()));

        db.import(strings(&[("a", "A"), ("b", "B")]), "first", CommitMetadata::new(), false)
            .unwrap();
        clock.advance(Duration::hours(1));
        db.import(strings(&[("a", "A")]), "replace", CommitMetadata::new(), true)
            .unwrap();

        let now = db.latest(&key()).unwrap();
        assert_eq!(now.len(), 1);
        let then = db.snapshot(&key(), start).unwrap();
        assert_eq!(then.len(), 2);

        let stats = db.stats().unwrap();
        assert_eq!(stats.commits, 2);
        assert!(!stats.durable);
        assert_eq!(db.refresh().unwrap(), 0);
    }

    #[test]
    fn test_open_durable() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path()).author("Importer", "import@example.com");

        {
            let db = Database::open_with_config(config.clone()).unwrap();
            db.import(strings(&[("a", "A")]), "first", CommitMetadata::new(), false)
                .unwrap();
        }

        let db = Database::open_with_config(config).unwrap();
        assert!(db.stats().unwrap().durable);
        assert_eq!(db.latest(&key()).unwrap().get("a").unwrap().text(), Some("A"));
        assert_eq!(db.keys().unwrap(), vec![key()]);
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let config = DatabaseConfig::new(dir.path().join("missing")).create_if_missing(false);
        assert!(matches!(
            Database::open_with_config(config),
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[test]
    fn test_empty_path_rejected() {
        let config = DatabaseConfig::new("");
        assert!(matches!(
            Database::open_with_config(config),
            Err(DatabaseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_shared_log_visible_to_both_handles() {
        let log: Arc<dyn CommitLog> = Arc::new(MemoryLog::new());
        let writer = Database::with_log(log.clone());
        let reader = Database::with_log(log);

        writer
            .import(strings(&[("a", "A")]), "first", CommitMetadata::new(), false)
            .unwrap();
        assert_eq!(reader.latest(&key()).unwrap().get("a").unwrap().text(), Some("A"));
        assert!(!reader.stats().unwrap().durable);
    }

    #[test]
    fn test_open_with_clock_stamps_commits() {
        let dir = TempDir::new().unwrap();
        let start = Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap();
        let db = Database::open_with_clock(
            DatabaseConfig::new(dir.path()),
            Arc::new(ManualClock::new(start)),
        )
        .unwrap();

        let written = db
            .import(strings(&[("a", "A")]), "first", CommitMetadata::new(), false)
            .unwrap();
        assert_eq!(written[0].timestamp, start);
        assert!(db.snapshot(&key(), start - Duration::seconds(1)).unwrap().is_empty());
    }

    #[test]
    fn test_stats_display() {
        let db = Database::in_memory();
        let text = db.stats().unwrap().to_string();
        assert!(text.contains("Backend: memory"));
    }
}
