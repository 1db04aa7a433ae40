//! # ember-consensus
//!
//! Consensus rules for the Ember blockchain.
//!
//! This crate provides:
//! - Per-network chain parameters and the subsidy schedule
//! - Compact target (`nBits`) encoding over 256-bit integers
//! - The in-memory chain index with median-time-past
//! - Difficulty retargeting under the four fork regimes (Bitcoin legacy,
//!   DGW3, DGW3-Nova, LWMA3)
//! - Proof-of-work verification with the height-activated memory-hard hash
//! - Template/block validity checks

mod chain;
mod error;
mod params;
mod pow;
mod target;
pub mod validation;
pub mod yespower;

pub use chain::{BlockIndexEntry, ChainIndex, ChainState};
pub use error::{ConsensusError, ConsensusResult};
pub use params::{ChainParams, Network, DEFAULT_BLOCK_MAX_WEIGHT, DEFAULT_BLOCK_MIN_TX_FEE};
pub use pow::{check_pow, next_work_required};
pub use target::{compact_to_target, target_to_compact, target_to_hash};
pub use validation::check_block_validity;

/// Current wall-clock time in unix seconds.
///
/// The peer time-offset adjustment lives in the network layer; nodes
/// without peers fall straight through to the system clock.
pub fn adjusted_time() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
