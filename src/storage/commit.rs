//!  Commit records and revision rows
//!
//!  commits are the atomic units of change in the log:
//! - each commit belongs to exactly one key
//! - each commit groups one or more revision rows
//! - commits from one stage are appended together as a single batch
//!
//! this module defines the records written to and read from a `CommitLog`

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::types::{CommitId, Key, StringId};

/// Attribution attached to a commit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMetadata {
    /// who made the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// where the change came from (an import job, a script, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// any further attribution fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl CommitMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(field.into(), value.into());
        self
    }
}

/// information about a written commit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInfo {
    pub id: CommitId,
    pub key: Key,
    pub message: String,
    pub metadata: CommitMetadata,
    pub timestamp: DateTime<Utc>,
    pub revision_count: usize,
}

impl CommitInfo {
    /// get a short summary of the commit (first line of message)
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or(&self.message)
    }
}

/// One append-only row: a single revision of a single string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRow {
    pub key: Key,
    pub string_id: StringId,
    pub commit_id: CommitId,
    pub text: Option<String>,
    pub deleted: bool,
    pub timestamp: DateTime<Utc>,
}

impl RevisionRow {
    /// ordering used for compaction: timestamp first, commit id breaks ties
    pub(crate) fn order(&self) -> (DateTime<Utc>, CommitId) {
        (self.timestamp, self.commit_id)
    }
}

/// A revision waiting to be written, already resolved to a concrete timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRevision {
    pub string_id: StringId,
    pub text: Option<String>,
    pub deleted: bool,
    pub timestamp: DateTime<Utc>,
}

/// A commit waiting to be written; the log assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCommit {
    pub key: Key,
    pub message: String,
    pub metadata: CommitMetadata,
    pub timestamp: DateTime<Utc>,
    pub revisions: Vec<PendingRevision>,
}

impl PendingCommit {
    /// turn this pending commit into its stored form under `id`
    pub(crate) fn into_records(self, id: CommitId) -> (CommitInfo, Vec<RevisionRow>) {
        let rows: Vec<RevisionRow> = self
            .revisions
            .into_iter()
            .map(|rev| RevisionRow {
                key: self.key.clone(),
                string_id: rev.string_id,
                commit_id: id,
                text: rev.text,
                deleted: rev.deleted,
                timestamp: rev.timestamp,
            })
            .collect();

        let info = CommitInfo {
            id,
            key: self.key,
            message: self.message,
            metadata: self.metadata,
            timestamp: self.timestamp,
            revision_count: rows.len(),
        };

        (info, rows)
    }
}

/// builder for pending commits with a fluent interface
#[derive(Debug)]
pub struct CommitBuilder {
    key: Key,
    message: String,
    metadata: CommitMetadata,
    timestamp: DateTime<Utc>,
    revisions: Vec<PendingRevision>,
}

impl CommitBuilder {
    /// create a new CommitBuilder for `key`, stamped at `timestamp`
    pub fn new(key: Key, timestamp: DateTime<Utc>) -> Self {
        Self {
            key,
            message: String::new(),
            metadata: CommitMetadata::default(),
            timestamp,
            revisions: Vec::new(),
        }
    }

    /// set the commit message
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// set the attribution metadata
    pub fn metadata(mut self, metadata: CommitMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// add a revision; `timestamp` defaults to the commit time
    pub fn revision(
        mut self,
        string_id: StringId,
        text: Option<String>,
        deleted: bool,
        timestamp: Option<DateTime<Utc>>,
    ) -> Self {
        self.revisions.push(PendingRevision {
            string_id,
            text,
            deleted,
            timestamp: timestamp.unwrap_or(self.timestamp),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn build(self) -> PendingCommit {
        PendingCommit {
            key: self.key,
            message: self.message,
            metadata: self.metadata,
            timestamp: self.timestamp,
            revisions: self.revisions,
        }
    }
}

/// message formatting for log entries
pub struct CommitMessage;

impl CommitMessage {
    /// format the summary line of a persisted batch
    pub fn batch(commits: &[CommitInfo]) -> String {
        match commits {
            [] => "[BATCH] empty".to_string(),
            [only] => format!("[COMMIT] {} {}: {}", only.id, only.key, only.summary()),
            [first, .., last] => format!(
                "[BATCH] {}..{} ({} commits)",
                first.id,
                last.id,
                commits.len()
            ),
        }
    }

    /// message of the root commit of a new repository
    pub fn initialize() -> &'static str {
        "[stringdb] Initialize repository"
    }
}
