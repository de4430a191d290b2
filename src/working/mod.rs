//! In-memory string values and working sets.
//!
//! A [`StringRevision`] is one immutable value (or deletion marker) of one
//! string; a [`WorkingSet`] maps string ids to revisions for a single key.
//! Both live purely in memory until a stage commits them.

mod error;
mod revision;
mod set;

pub use error::{WorkingSetError, WorkingSetResult};
pub use revision::{differs, StringRevision};
pub use set::WorkingSet;
