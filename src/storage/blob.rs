//!  Blob encoding for persisted batches.
//!
//! Each append to a `GitLog` is stored as one JSON blob named `batch.json`
//! at the root of the commit's tree. The blob carries every commit of the
//! batch together with its revision rows, so a batch is one object and one
//! ref update.
//!
//! ```text
//! {
//!   "commits": [
//!     {
//!       "id": 12,
//!       "key": { "component": "browser", "language": "fr", "branch": "main" },
//!       "message": "import",
//!       "metadata": { "author": "alice" },
//!       "timestamp": "2024-01-01T12:00:00Z",
//!       "revisions": [
//!         { "id": "greeting", "text": "Bonjour", "deleted": false, "timestamp": "..." },
//!         { "id": "farewell", "text": null, "deleted": true, "timestamp": "..." }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! `text: null` and `text: ""` are kept apart.

use chrono::{DateTime, Utc};
use git2::Repository;
use serde::{Deserialize, Serialize};

use crate::storage::commit::{CommitInfo, CommitMetadata, RevisionRow};
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{CommitId, Key, StringId};

/// name of the blob holding a batch inside each commit tree
pub(crate) const BATCH_FILE: &str = "batch.json";

#[derive(Serialize, Deserialize)]
struct BatchJson {
    commits: Vec<CommitJson>,
}

#[derive(Serialize, Deserialize)]
struct CommitJson {
    id: CommitId,
    key: Key,
    message: String,
    #[serde(default)]
    metadata: CommitMetadata,
    timestamp: DateTime<Utc>,
    revisions: Vec<RevisionJson>,
}

#[derive(Serialize, Deserialize)]
struct RevisionJson {
    id: StringId,
    text: Option<String>,
    deleted: bool,
    timestamp: DateTime<Utc>,
}

/// serialize a batch of commits to JSON bytes
pub fn serialize_batch(records: &[(CommitInfo, Vec<RevisionRow>)]) -> StorageResult<Vec<u8>> {
    let json = BatchJson {
        commits: records
            .iter()
            .map(|(info, rows)| CommitJson {
                id: info.id,
                key: info.key.clone(),
                message: info.message.clone(),
                metadata: info.metadata.clone(),
                timestamp: info.timestamp,
                revisions: rows
                    .iter()
                    .map(|row| RevisionJson {
                        id: row.string_id.clone(),
                        text: row.text.clone(),
                        deleted: row.deleted,
                        timestamp: row.timestamp,
                    })
                    .collect(),
            })
            .collect(),
    };

    Ok(serde_json::to_vec_pretty(&json)?)
}

/// deserialize a batch from JSON bytes
///
/// validates that commit ids inside the batch are strictly increasing
pub fn deserialize_batch(bytes: &[u8]) -> StorageResult<Vec<(CommitInfo, Vec<RevisionRow>)>> {
    let json: BatchJson = serde_json::from_slice(bytes)?;

    let mut records = Vec::with_capacity(json.commits.len());
    let mut previous: Option<CommitId> = None;

    for commit in json.commits {
        if previous.is_some_and(|p| commit.id <= p) {
            return Err(StorageError::CorruptedData {
                path: BATCH_FILE.into(),
                reason: format!("commit {} is out of order", commit.id),
            });
        }
        previous = Some(commit.id);

        let rows: Vec<RevisionRow> = commit
            .revisions
            .into_iter()
            .map(|rev| RevisionRow {
                key: commit.key.clone(),
                string_id: rev.id,
                commit_id: commit.id,
                text: rev.text,
                deleted: rev.deleted,
                timestamp: rev.timestamp,
            })
            .collect();

        let info = CommitInfo {
            id: commit.id,
            key: commit.key,
            message: commit.message,
            metadata: commit.metadata,
            timestamp: commit.timestamp,
            revision_count: rows.len(),
        };
        records.push((info, rows));
    }

    Ok(records)
}

/// write a batch as a blob to the repository, returning its Oid
pub fn write_batch(
    repo: &Repository,
    records: &[(CommitInfo, Vec<RevisionRow>)],
) -> StorageResult<git2::Oid> {
    let bytes = serialize_batch(records)?;
    Ok(repo.blob(&bytes)?)
}

/// read a blob's content from the repository
pub fn read_blob(repo: &Repository, oid: git2::Oid) -> StorageResult<Vec<u8>> {
    let blob = repo.find_blob(oid)?;
    Ok(blob.content().to_vec())
}
