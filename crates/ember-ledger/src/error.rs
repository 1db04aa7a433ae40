//! Error types for the token ledger.

use thiserror::Error;

/// Token ledger errors.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Signature verification failed or the signer is not the acting party.
    #[error("invalid signature: {0}")]
    SignatureInvalid(String),

    /// Operation hash already seen this session.
    #[error("duplicate operation: {0}")]
    DuplicateOperation(String),

    /// Sender balance below the requested amount.
    #[error("insufficient balance of {token} for {address}")]
    InsufficientBalance { address: String, token: String },

    /// Spender allowance below the requested amount.
    #[error("insufficient allowance of {token} for {spender}")]
    InsufficientAllowance { spender: String, token: String },

    /// BURN or MINT against a token with no registered metadata.
    #[error("unknown token: {0}")]
    UnknownToken(String),

    /// MINT or ownership transfer by a wallet that is not the operator.
    #[error("{0} is not the token operator")]
    NotOperator(String),

    /// CREATE against a token id that already has metadata.
    #[error("token metadata already exists: {0}")]
    MetadataExists(String),

    /// The persisted state was written by a newer schema.
    #[error("ledger schema version {found} is newer than supported {supported}")]
    SchemaTooNew { found: u32, supported: u32 },

    /// Persistence failure.
    #[error("ledger store error: {0}")]
    Store(#[from] ember_storage::StorageError),

    /// Persisted state failed to decode.
    #[error("ledger state decode error: {0}")]
    Decode(#[from] ember_primitives::DecodeError),
}

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;
