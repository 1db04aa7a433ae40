//! # ember-primitives
//!
//! Core data types for the Ember blockchain.
//!
//! This crate provides:
//! - Block headers and blocks with consensus-critical wire serialisation
//! - Transactions with SegWit witness support
//! - A minimal script builder/parser (push-data level, no interpreter)
//! - Double-SHA256 hashing and merkle tree construction
//! - Amounts and fee rates

pub mod address;
pub mod amount;
pub mod block;
pub mod hash;
pub mod merkle;
pub mod script;
pub mod serialize;
pub mod transaction;

pub use address::{AddressError, Destination};
pub use amount::{Amount, FeeRate, COIN};
pub use block::{Block, BlockHeader};
pub use hash::{hash160, sha256d, Hash160, Hash256};
pub use merkle::{block_merkle_root, block_witness_merkle_root, merkle_root};
pub use script::Script;
pub use serialize::{deserialize, serialize, Decodable, DecodeError, Encodable};
pub use transaction::{OutPoint, Transaction, TxIn, TxOut};

/// Weight units per virtual byte.
pub const WITNESS_SCALE_FACTOR: usize = 4;

/// Maximum block weight in weight units.
pub const MAX_BLOCK_WEIGHT: usize = 4_000_000;

/// Maximum signature-operation cost per block.
pub const MAX_BLOCK_SIGOPS_COST: i64 = 80_000;
