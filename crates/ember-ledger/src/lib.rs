//! # ember-ledger
//!
//! The on-chain token ledger: a deterministic sub-ledger layered over the
//! base chain through `OP_RETURN` payloads.
//!
//! Confirmed blocks drive the canonical `replay` path; wallet-initiated
//! operations go through `apply`, which additionally charges a governance
//! fee and can record the operation on chain and broadcast it to peers
//! through the [`WalletBridge`] seam.

mod error;
mod ledger;
mod operation;
mod signature;
mod store;

pub use error::{LedgerError, LedgerResult};
pub use ledger::{AllowanceKey, TokenLedger, TokenMeta, WalletSigners};
pub use operation::{
    decode_token_script, generate_token_id, is_valid_token_id, operation_hash, token_message,
    TokenOp, TokenOperation,
};
pub use signature::{message_hash, sign_message, sign_operation, verify_message, MESSAGE_MAGIC};
pub use store::{LedgerSnapshot, LedgerStore};

use ember_primitives::{Amount, Block, Script};

/// Current schema version of the persisted ledger state.
pub const TOKEN_DB_VERSION: u32 = 3;

/// Default fee rate for token operations (excluding create).
pub const TOKEN_DEFAULT_FEE_PER_VBYTE: Amount = 10_000;

/// Special fee rate applied when creating new tokens.
pub const TOKEN_CREATE_FEE_PER_VBYTE: Amount = 10_000_000;

/// Minimum governance fee per operation.
pub const TOKEN_MIN_GOV_FEE: Amount = 7_500_000;

/// Value of the dust output carrying an on-chain operation record.
pub const TOKEN_RECORD_DUST: Amount = 546;

/// Read access to confirmed blocks, used by rescan.
pub trait BlockSource {
    fn tip_height(&self) -> i64;
    fn block_at(&self, height: i64) -> Option<Block>;
}

/// Wallet-side collaborator for the online apply path.
///
/// Implementations build and commit real chain transactions; the ledger
/// only decides what to pay and what to record.
pub trait WalletBridge: Send + Sync {
    /// Pay `amount` from `wallet` to the governance address. Returns true
    /// once the payment transaction is committed.
    fn send_governance_fee(&self, wallet: &str, governance_address: &str, amount: Amount) -> bool;

    /// Commit a transaction from `wallet` carrying `script` on a
    /// dust-value output.
    fn record_operation(&self, wallet: &str, script: &Script, value: Amount) -> bool;

    /// Relay the operation to peers.
    fn broadcast(&self, op: &operation::TokenOperation);
}
