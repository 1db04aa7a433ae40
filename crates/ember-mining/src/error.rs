//! Error types for mining.

use thiserror::Error;

/// Mining errors.
#[derive(Error, Debug)]
pub enum MiningError {
    /// The configured payout address does not parse on this network.
    #[error("invalid payout address: {0}")]
    InvalidPayoutAddress(String),

    /// The assembled template failed the block validity self-check.
    #[error("assembled template invalid: {0}")]
    TemplateInvalid(#[from] ember_consensus::ConsensusError),

    /// There is no chain tip to build on.
    #[error("chain has no tip")]
    EmptyChain,
}

/// Result type for mining operations.
pub type MiningResult<T> = Result<T, MiningError>;
