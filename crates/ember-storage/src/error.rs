//! Storage error types.

use thiserror::Error;

/// Storage errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] rocksdb::Error),

    /// A required column family is missing.
    #[error("missing column family: {0}")]
    MissingColumnFamily(&'static str),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
