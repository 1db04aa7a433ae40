//! # ember-mining
//!
//! Mining support for the Ember blockchain.
//!
//! This crate provides:
//! - Block template assembly from the mempool's ancestor-fee-rate view
//! - Coinbase construction with the governance/operator reward split
//! - Witness commitment generation
//! - A thread-per-worker CPU mining coordinator

mod assembler;
mod coinbase;
mod error;
mod miner;

pub use assembler::{AssemblerOptions, BlockAssembler, BlockTemplate};
pub use coinbase::{
    append_witness_commitment, build_coinbase, increment_extra_nonce, regenerate_commitments,
    ExtraNonceCounter, COINBASE_SENTINEL, GOV_BPS, OP_BPS,
};
pub use error::{MiningError, MiningResult};
pub use miner::{BlockSubmitter, Miner, MinerConfig};

/// Weight reserved for the coinbase transaction in a fresh template.
pub const COINBASE_WEIGHT_RESERVE: u64 = 4_000;

/// Sigop cost reserved for the coinbase transaction in a fresh template.
pub const COINBASE_SIGOPS_RESERVE: i64 = 400;
