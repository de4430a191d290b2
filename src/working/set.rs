//! Working sets: the in-memory view of one key's strings.

use std::collections::btree_map;
use std::collections::BTreeMap;

use crate::storage::{Key, StringId};
use crate::working::error::{WorkingSetError, WorkingSetResult};
use crate::working::revision::StringRevision;

/// Mapping of string id to revision for one (component, language, branch).
///
/// Iteration always yields revisions in ascending id order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingSet {
    key: Key,
    revisions: BTreeMap<StringId, StringRevision>,
}

impl WorkingSet {
    pub fn new(key: Key) -> Self {
        Self {
            key,
            revisions: BTreeMap::new(),
        }
    }

    /// Build a set from revisions, later ids overwriting earlier ones.
    pub fn from_revisions(key: Key, revisions: impl IntoIterator<Item = StringRevision>) -> Self {
        let revisions = revisions
            .into_iter()
            .map(|rev| (rev.id().clone(), rev))
            .collect();
        Self { key, revisions }
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Add a revision.
    ///
    /// Fails with `DuplicateKey` if the id is already present and
    /// `overwrite` is false; otherwise replaces unconditionally.
    pub fn add(&mut self, revision: StringRevision, overwrite: bool) -> WorkingSetResult<()> {
        match self.revisions.entry(revision.id().clone()) {
            btree_map::Entry::Occupied(mut slot) => {
                if !overwrite {
                    return Err(WorkingSetError::DuplicateKey {
                        key: self.key.clone(),
                        id: slot.key().clone(),
                    });
                }
                slot.insert(revision);
            }
            btree_map::Entry::Vacant(slot) => {
                slot.insert(revision);
            }
        }
        Ok(())
    }

    /// Validate `id` and add a text revision without overwriting.
    pub fn add_text(&mut self, id: &str, text: impl Into<String>) -> WorkingSetResult<()> {
        let id = StringId::new(id)?;
        self.add(StringRevision::new(id, text), false)
    }

    /// With `None`, whether the set has any revision; with an id, whether
    /// that id is present.
    pub fn has(&self, id: Option<&str>) -> bool {
        match id {
            Some(id) => self.revisions.contains_key(id),
            None => !self.revisions.is_empty(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&StringRevision> {
        self.revisions.get(id)
    }

    /// Remove an id; removing a missing id is a no-op.
    pub fn unlink(&mut self, id: &str) -> Option<StringRevision> {
        self.revisions.remove(id)
    }

    pub fn clear(&mut self) {
        self.revisions.clear();
    }

    pub fn len(&self) -> usize {
        self.revisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.revisions.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &StringId> {
        self.revisions.keys()
    }

    /// Revisions in ascending id order. Call again to restart.
    pub fn iter(&self) -> impl Iterator<Item = &StringRevision> {
        self.revisions.values()
    }

    /// Merge `other` into this set, its revisions winning per id.
    pub(crate) fn merge(&mut self, other: WorkingSet) {
        self.revisions.extend(other.revisions);
    }
}

impl<'a> IntoIterator for &'a WorkingSet {
    type Item = &'a StringRevision;
    type IntoIter = btree_map::Values<'a, StringId, StringRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.values()
    }
}

impl IntoIterator for WorkingSet {
    type Item = StringRevision;
    type IntoIter = btree_map::IntoValues<StringId, StringRevision>;

    fn into_iter(self) -> Self::IntoIter {
        self.revisions.into_values()
    }
}
