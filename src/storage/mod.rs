//! storage layer for stringdb
//!
//! this module owns the append-only commit log. The upper layers (stage,
//! snapshot reader) talk to it through the [`CommitLog`] trait and never
//! touch git2 directly.
//!
//!  # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     dyn CommitLog                           │
//! │   (append batches, latest-row-per-string, history)          │
//! └─────────────────────────────────────────────────────────────┘
//!                 │                              │
//!                 ▼                              ▼
//!          ┌─────────────┐                ┌─────────────┐
//!          │  MemoryLog  │                │   GitLog    │
//!          │ (ephemeral) │                │  (durable)  │
//!          └─────────────┘                └─────────────┘
//!                 │                         │        │
//!                 │                         ▼        ▼
//!                 │                   ┌────────┐ ┌────────┐
//!                 │                   │  blob  │ │  refs  │
//!                 │                   └────────┘ └────────┘
//!                 ▼                         │
//!          ┌─────────────────────────────────────┐
//!          │       index (latest per string)     │
//!          └─────────────────────────────────────┘
//!  ```
//!
//! # Usage
//!
//! ```ignore
//! use stringdb::clock::{Clock, SystemClock};
//! use stringdb::storage::{CommitBuilder, CommitLog, GitLog, Key, StringId};
//!
//! let log = GitLog::open_or_init("./strings", &SystemClock)?;
//! let key = Key::parse("browser", "fr", "main")?;
//!
//! let pending = CommitBuilder::new(key.clone(), SystemClock.now())
//!     .message("import")
//!     .revision(StringId::new("greeting")?, Some("Bonjour".into()), false, None)
//!     .build();
//! log.append(vec![pending])?;
//!
//! let rows = log.latest_at(&key, SystemClock.now())?;
//! ```

mod blob;
mod commit;
mod error;
mod index;
mod memory;
mod refs;
mod repository;
mod types;

use chrono::{DateTime, Utc};

// Re-export public API
pub use commit::{
    CommitBuilder, CommitInfo, CommitMessage, CommitMetadata, PendingCommit, PendingRevision,
    RevisionRow,
};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryLog;
pub use repository::{GitLog, GitSignature, LogStats};
pub use types::{
    Branch, Change, ChangeStatus, CommitId, Component, InvalidNameError, Key, Language, StringId,
};

/// The durable, append-only store of commits and revision rows.
///
/// Implementations must make [`CommitLog::append`] all-or-nothing: a reader
/// either sees every commit of a batch or none of them.
pub trait CommitLog: Send + Sync {
    /// Append a batch of commits atomically, returning them with their ids.
    fn append(&self, batch: Vec<PendingCommit>) -> StorageResult<Vec<CommitInfo>>;

    /// The most recent row per string id under `key` at or before `asof`.
    ///
    /// Rows sharing a timestamp are ordered by commit id; the highest wins.
    /// Deletion rows are included. The result is ordered by string id.
    fn latest_at(&self, key: &Key, asof: DateTime<Utc>) -> StorageResult<Vec<RevisionRow>>;

    /// Every row ever written for one string, oldest first.
    fn string_history(&self, key: &Key, id: &StringId) -> StorageResult<Vec<RevisionRow>>;

    /// Commits, newest first, optionally restricted to one key.
    fn commits(&self, key: Option<&Key>) -> StorageResult<Vec<CommitInfo>>;

    /// Look up a single commit.
    fn get_commit(&self, id: CommitId) -> StorageResult<CommitInfo>;

    /// Every key with at least one commit.
    fn keys(&self) -> StorageResult<Vec<Key>>;
}
