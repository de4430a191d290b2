//!  Reference management for the log.
//!
//!  The whole log hangs off a single ref. This module handles:
//! - creating the ref on init
//! - resolving its tip
//! - moving it with compare-and-swap semantics
//!
//! Nothing written to the object database is visible to readers until the
//! ref points at it.

use git2::{Oid, Repository};

use crate::storage::error::{StorageError, StorageResult};

/// Manages the log reference.
pub struct RefManager;

impl RefManager {
    /// the ref every batch commit is chained on
    pub const LOG_REF: &'static str = "refs/heads/stringdb";

    /// Point the log ref (and HEAD) at the root commit of a new repository.
    pub fn init_log_ref(repo: &Repository, root: Oid) -> StorageResult<()> {
        repo.reference(Self::LOG_REF, root, false, "initialize stringdb log")?;
        repo.set_head(Self::LOG_REF)?;
        Ok(())
    }

    /// Resolve the log ref to the commit it points at.
    pub fn tip(repo: &Repository) -> StorageResult<Oid> {
        let reference = repo
            .find_reference(Self::LOG_REF)
            .map_err(|_| StorageError::NotInitialized(repo.path().to_path_buf()))?;

        let commit = reference.peel_to_commit()?;
        Ok(commit.id())
    }

    /// Check if the log ref exists.
    pub fn exists(repo: &Repository) -> bool {
        repo.find_reference(Self::LOG_REF).is_ok()
    }

    /// Move the log ref only if it still points to `expected`.
    ///
    /// Returns `ConcurrentModification` if another writer moved it first.
    pub fn advance(repo: &Repository, expected: Oid, new_target: Oid) -> StorageResult<()> {
        let current = Self::tip(repo)?;
        if current != expected {
            return Err(StorageError::ConcurrentModification {
                reference: Self::LOG_REF.to_string(),
            });
        }

        repo.reference_matching(
            Self::LOG_REF,
            new_target,
            true,
            expected,
            &format!("append batch {}", new_target),
        )
        .map_err(|e| {
            if e.code() == git2::ErrorCode::Modified {
                StorageError::ConcurrentModification {
                    reference: Self::LOG_REF.to_string(),
                }
            } else {
                StorageError::Git(e)
            }
        })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn commit_on(repo: &Repository, parent: Option<Oid>, message: &str) -> Oid {
        let tree_id = repo.treebuilder(None).unwrap().write().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@localhost").unwrap();
        let parents: Vec<git2::Commit<'_>> = parent
            .map(|p| repo.find_commit(p).unwrap())
            .into_iter()
            .collect();
        let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
        repo.commit(None, &sig, &sig, message, &tree, &parent_refs)
            .unwrap()
    }

    #[test]
    fn test_init_and_advance() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert!(!RefManager::exists(&repo));

        let root = commit_on(&repo, None, "root");
        RefManager::init_log_ref(&repo, root).unwrap();
        assert_eq!(RefManager::tip(&repo).unwrap(), root);

        let next = commit_on(&repo, Some(root), "next");
        RefManager::advance(&repo, root, next).unwrap();
        assert_eq!(RefManager::tip(&repo).unwrap(), next);
    }

    #[test]
    fn test_stale_advance_rejected() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        let root = commit_on(&repo, None, "root");
        RefManager::init_log_ref(&repo, root).unwrap();

        let a = commit_on(&repo, Some(root), "a");
        let b = commit_on(&repo, Some(root), "b");
        RefManager::advance(&repo, root, a).unwrap();

        let result = RefManager::advance(&repo, root, b);
        assert!(matches!(
            result,
            Err(StorageError::ConcurrentModification { .. })
        ));
        assert_eq!(RefManager::tip(&repo).unwrap(), a);
    }

    #[test]
    fn test_tip_on_uninitialized_repo() {
        let dir = TempDir::new().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        assert!(matches!(
            RefManager::tip(&repo),
            Err(StorageError::NotInitialized(_))
        ));
    }
}
