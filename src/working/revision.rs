//! Immutable string revisions and the content-equality predicate.

use chrono::{DateTime, Utc};

use crate::storage::{RevisionRow, StringId};

/// One value of one string, or a deletion marker.
///
/// `text` distinguishes "no text" (`None`) from an explicit empty string.
/// `timestamp` is optional while the revision is in memory; a commit stamps
/// revisions without one at the commit time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringRevision {
    id: StringId,
    text: Option<String>,
    timestamp: Option<DateTime<Utc>>,
    deleted: bool,
}

impl StringRevision {
    /// a revision carrying `text`
    pub fn new(id: StringId, text: impl Into<String>) -> Self {
        Self {
            id,
            text: Some(text.into()),
            timestamp: None,
            deleted: false,
        }
    }

    /// a revision with no text at all
    pub fn absent(id: StringId) -> Self {
        Self {
            id,
            text: None,
            timestamp: None,
            deleted: false,
        }
    }

    /// a deletion marker
    pub fn deleted(id: StringId) -> Self {
        Self {
            id,
            text: None,
            timestamp: None,
            deleted: true,
        }
    }

    /// pin the revision to an explicit time instead of the commit time
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_text(mut self, text: Option<String>) -> Self {
        self.text = text;
        self
    }

    pub fn id(&self) -> &StringId {
        &self.id
    }

    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.timestamp
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }
}

impl From<RevisionRow> for StringRevision {
    fn from(row: RevisionRow) -> Self {
        Self {
            id: row.string_id,
            text: row.text,
            timestamp: Some(row.timestamp),
            deleted: row.deleted,
        }
    }
}

/// Whether two revisions carry different content.
///
/// Ids and timestamps are ignored. Deletion flags must match, and texts are
/// compared after trimming whitespace; absent text never equals an explicit
/// empty string.
pub fn differs(a: &StringRevision, b: &StringRevision) -> bool {
    if a.deleted != b.deleted {
        return true;
    }

    match (a.text.as_deref(), b.text.as_deref()) {
        (None, None) => false,
        (Some(x), Some(y)) => x.trim() != y.trim(),
        _ => true,
    }
}
