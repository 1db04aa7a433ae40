//! Error types for mempool operations.

use thiserror::Error;

/// Mempool errors.
#[derive(Error, Debug)]
pub enum MempoolError {
    /// Transaction already present.
    #[error("transaction already in pool: {0}")]
    AlreadyExists(String),

    /// Transaction not found.
    #[error("transaction not in pool: {0}")]
    NotFound(String),

    /// An input is already spent by another pool transaction.
    #[error("conflicting spend of {0}")]
    Conflict(String),
}

/// Result type for mempool operations.
pub type MempoolResult<T> = Result<T, MempoolError>;
