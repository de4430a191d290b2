//! stringdb - A version-controlled store for localized strings
//!
//! Every revision of every translatable string is kept in an append-only
//! commit log, per (component, language, branch). Callers stage working
//! sets, rebase them against the latest committed state so only genuine
//! changes remain, commit them atomically, and read back the state of any
//! key as of any point in time.
//!
//! # Example
//!
//! ```no_run
//! use stringdb::db::Database;
//! use stringdb::storage::{CommitMetadata, Key};
//! use stringdb::working::WorkingSet;
//!
//! let db = Database::open("./strings").unwrap();
//! let key = Key::parse("browser", "fr", "main").unwrap();
//!
//! let mut ws = WorkingSet::new(key.clone());
//! ws.add_text("greeting", "Bonjour").unwrap();
//!
//! let mut stage = db.stage();
//! stage.add(ws);
//! stage.commit("import", CommitMetadata::new().author("alice"), true).unwrap();
//!
//! for revision in &db.latest(&key).unwrap() {
//!     println!("{} = {:?}", revision.id(), revision.text());
//! }
//! ```

pub mod clock;
pub mod db;
pub mod snapshot;
pub mod stage;
pub mod storage;
pub mod working;
