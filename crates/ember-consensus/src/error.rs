//! Error types for consensus validation.

use thiserror::Error;

/// Consensus validation errors.
#[derive(Error, Debug)]
pub enum ConsensusError {
    /// The compact target decodes negative, zero, overflowed or above the
    /// active proof-of-work limit.
    #[error("proof-of-work target out of range: bits={bits:#010x}")]
    TargetOutOfRange { bits: u32 },

    /// The (re)computed block hash does not satisfy the target.
    #[error("hash above target: hash={hash}, bits={bits:#010x}")]
    HashAboveTarget { hash: String, bits: u32 },

    /// Invalid block header.
    #[error("invalid block header: {0}")]
    InvalidHeader(String),

    /// Invalid block structure.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// Block timestamp not after the median time past.
    #[error("block time {block_time} not after median time past {median_time_past}")]
    TimeTooOld {
        block_time: i64,
        median_time_past: i64,
    },

    /// Block too heavy.
    #[error("block weight {weight} exceeds maximum {max}")]
    BlockTooHeavy { weight: usize, max: usize },

    /// A transaction in the block is not final.
    #[error("non-final transaction {txid}")]
    NonFinalTransaction { txid: String },

    /// The declared merkle root does not match the transactions.
    #[error("merkle root mismatch")]
    MerkleMismatch,

    /// The witness commitment is missing or wrong.
    #[error("bad witness commitment: {0}")]
    BadWitnessCommitment(String),

    /// Not enough chain history for the requested calculation.
    #[error("insufficient chain history at height {height}")]
    InsufficientHistory { height: i64 },
}

/// Result type for consensus operations.
pub type ConsensusResult<T> = Result<T, ConsensusError>;
