//! High-level Database API.
//!
//! This module wires a commit log and a clock together and hands out
//! stages and snapshot readers that share them.

mod api;

pub use api::{Database, DatabaseConfig, DatabaseError, DatabaseResult, DatabaseStats};
