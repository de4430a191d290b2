//! Staging, rebasing and committing working sets.
//!
//! A [`Stage`] collects working sets for any number of keys. Rebasing trims
//! each set down to what actually differs from the latest committed state;
//! committing writes one commit per non-empty key as a single atomic batch.
//!
//! # Usage
//!
//! ```ignore
//! use stringdb::db::Database;
//! use stringdb::storage::{CommitMetadata, Key};
//! use stringdb::working::WorkingSet;
//!
//! let db = Database::in_memory();
//! let key = Key::parse("browser", "fr", "main")?;
//!
//! let mut ws = WorkingSet::new(key);
//! ws.add_text("greeting", "Bonjour")?;
//!
//! let mut stage = db.stage();
//! stage.add(ws);
//! stage.commit("import", CommitMetadata::new().author("alice"), true)?;
//! stage.clear();
//! ```

mod error;
mod staging;

pub use error::{StageError, StageResult};
pub use staging::Stage;
