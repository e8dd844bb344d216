//! Local object store: stored credentials and result snapshots.
//!
//! - `model`: rows returned by repositories.
//! - `repo`: SQL-only functions over the SQLite pool.
//!
//! External modules should import from `xero_archiver::db`; the repository
//! API is re-exported here.

pub mod model;
pub mod repo;

pub use model::Snapshot;
pub use repo::*;
