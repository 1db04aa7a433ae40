//! Token operations and their wire format.
//!
//! The serialised form is stable and consensus-relevant: operations are
//! embedded in `OP_RETURN` outputs and replayed by every node. The current
//! format carries an explicit memo-present flag; the older format without
//! it must remain decodable.

use crate::error::LedgerResult;
use ember_primitives::serialize::{serialize, Decodable, DecodeError, Encodable};
use ember_primitives::{sha256d, Amount, Hash256, Script};
use std::io::{self, Read, Write};

/// The nine token operation kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenOp {
    Create = 0,
    Transfer = 1,
    Approve = 2,
    TransferFrom = 3,
    IncreaseAllowance = 4,
    DecreaseAllowance = 5,
    Burn = 6,
    Mint = 7,
    TransferOwnership = 8,
}

impl TokenOp {
    pub fn from_u8(value: u8) -> Option<TokenOp> {
        Some(match value {
            0 => TokenOp::Create,
            1 => TokenOp::Transfer,
            2 => TokenOp::Approve,
            3 => TokenOp::TransferFrom,
            4 => TokenOp::IncreaseAllowance,
            5 => TokenOp::DecreaseAllowance,
            6 => TokenOp::Burn,
            7 => TokenOp::Mint,
            8 => TokenOp::TransferOwnership,
            _ => return None,
        })
    }
}

impl Default for TokenOp {
    fn default() -> Self {
        TokenOp::Create
    }
}

/// One token operation as carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenOperation {
    pub op: TokenOp,
    pub from: String,
    pub to: String,
    pub spender: String,
    pub token: String,
    pub amount: Amount,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub timestamp: i64,
    pub signer: String,
    pub signature: String,
    pub memo: String,
}

impl TokenOperation {
    /// The party whose signature must cover this operation.
    pub fn acting_party(&self) -> &str {
        if self.op == TokenOp::TransferFrom {
            &self.spender
        } else {
            &self.from
        }
    }

    /// Serialised size in bytes, the basis of the governance fee.
    pub fn vsize(&self) -> u64 {
        serialize(self).len() as u64
    }
}

impl Encodable for TokenOperation {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        (self.op as u8).encode(w)?;
        self.from.encode(w)?;
        self.to.encode(w)?;
        self.spender.encode(w)?;
        self.token.encode(w)?;
        self.amount.encode(w)?;
        self.name.encode(w)?;
        self.symbol.encode(w)?;
        self.decimals.encode(w)?;
        self.timestamp.encode(w)?;
        self.signer.encode(w)?;
        self.signature.encode(w)?;
        let has_memo = !self.memo.is_empty();
        has_memo.encode(w)?;
        if has_memo {
            self.memo.encode(w)?;
        }
        Ok(())
    }
}

impl Decodable for TokenOperation {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut op = decode_without_memo(r)?;
        let has_memo = bool::decode(r)?;
        if has_memo {
            op.memo = String::decode(r)?;
        }
        Ok(op)
    }
}

fn decode_without_memo<R: Read>(r: &mut R) -> Result<TokenOperation, DecodeError> {
    let op_val = u8::decode(r)?;
    let op = TokenOp::from_u8(op_val).ok_or(DecodeError::InvalidValue("unknown token op"))?;
    Ok(TokenOperation {
        op,
        from: String::decode(r)?,
        to: String::decode(r)?,
        spender: String::decode(r)?,
        token: String::decode(r)?,
        amount: Amount::decode(r)?,
        name: String::decode(r)?,
        symbol: String::decode(r)?,
        decimals: u8::decode(r)?,
        timestamp: i64::decode(r)?,
        signer: String::decode(r)?,
        signature: String::decode(r)?,
        memo: String::new(),
    })
}

/// Decode a token operation from raw payload bytes, accepting both the
/// current format (memo flag) and the legacy format without it.
pub fn decode_token_payload(data: &[u8]) -> Option<TokenOperation> {
    // Current format first.
    {
        let mut cursor = data;
        if let Ok(op) = TokenOperation::decode(&mut cursor) {
            if cursor.is_empty() {
                return Some(op);
            }
        }
    }
    // Legacy fallback: no memo flag; a trailing string, if any, is the memo.
    let mut cursor = data;
    let mut op = decode_without_memo(&mut cursor).ok()?;
    if !cursor.is_empty() {
        op.memo = String::decode(&mut cursor).ok()?;
        if !cursor.is_empty() {
            return None;
        }
    }
    Some(op)
}

/// Attempt to decode a token operation from a transaction output script.
/// Token carriers are `OP_RETURN` followed by a single data push.
pub fn decode_token_script(script: &Script) -> Option<TokenOperation> {
    let payload = script.op_return_payload()?;
    decode_token_payload(payload)
}

/// Hash identifying an operation for replay protection: the serialised
/// operation with signer and signature blanked.
pub fn operation_hash(op: &TokenOperation) -> Hash256 {
    let mut blanked = op.clone();
    blanked.signer.clear();
    blanked.signature.clear();
    sha256d(&serialize(&blanked))
}

/// The canonical message string covered by the operation signature.
pub fn token_message(op: &TokenOperation) -> String {
    let mut msg = format!(
        "op={}|from={}|to={}|spender={}|token={}|amount={}|name={}|symbol={}|decimals={}|timestamp={}",
        op.op as u8,
        op.from,
        op.to,
        op.spender,
        op.token,
        op.amount,
        op.name,
        op.symbol,
        op.decimals,
        op.timestamp
    );
    if !op.memo.is_empty() {
        msg.push_str("|memo=");
        msg.push_str(&op.memo);
    }
    msg
}

/// Validate the token-id shape: `"0x" + 54 hex chars + "tok"`, 59 bytes.
pub fn is_valid_token_id(token: &str) -> bool {
    if token.len() != 59 {
        return false;
    }
    if !token.starts_with("0x") {
        return false;
    }
    if &token[56..] != "tok" {
        return false;
    }
    token[2..56].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Derive a fresh token id from the creator and name, bumping an extra
/// nonce until `exists` stops matching.
pub fn generate_token_id<F>(creator: &str, name: &str, exists: F) -> LedgerResult<String>
where
    F: Fn(&str) -> bool,
{
    let mut extranonce: i32 = 0;
    loop {
        let mut buf = Vec::new();
        creator
            .to_string()
            .encode(&mut buf)
            .expect("writing to Vec cannot fail");
        name.to_string()
            .encode(&mut buf)
            .expect("writing to Vec cannot fail");
        extranonce.encode(&mut buf).expect("writing to Vec cannot fail");
        let hash = sha256d(&buf);
        let token = format!("0x{}tok", &hash.to_hex()[..54]);
        if !exists(&token) {
            return Ok(token);
        }
        extranonce += 1;
    }
}
