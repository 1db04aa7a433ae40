//! # ember-storage
//!
//! Keyed persistent store for the Ember node, backed by RocksDB.
//!
//! Column families:
//! - `ledger`: the token ledger snapshot (`'v'` version, `'s'` state)
//! - `metadata`: node metadata

mod batch;
mod database;
mod error;

pub use batch::WriteBatch;
pub use database::{ColumnFamily, Database};
pub use error::{StorageError, StorageResult};
