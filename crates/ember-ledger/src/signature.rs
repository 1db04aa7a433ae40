//! Message signing and verification for token operations.
//!
//! Signatures are 65-byte compact recoverable ECDSA over the double-SHA256
//! of the magic-prefixed canonical message, transported as base64. The
//! recovered public key is hashed and compared against the signer address,
//! which may be legacy (P2PKH) or witness (P2WPKH).

use crate::error::{LedgerError, LedgerResult};
use crate::operation::{token_message, TokenOperation};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ember_primitives::serialize::Encodable;
use ember_primitives::{hash160, sha256d, Destination, Hash256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};

/// Prefix preventing a signed message from doubling as transaction data.
pub const MESSAGE_MAGIC: &str = "Ember Signed Message:\n";

/// The digest a message signature commits to.
pub fn message_hash(message: &str) -> Hash256 {
    let mut buf = Vec::with_capacity(MESSAGE_MAGIC.len() + message.len() + 8);
    MESSAGE_MAGIC
        .to_string()
        .encode(&mut buf)
        .expect("writing to Vec cannot fail");
    message
        .to_string()
        .encode(&mut buf)
        .expect("writing to Vec cannot fail");
    sha256d(&buf)
}

/// Sign a message with a compact recoverable signature, base64-encoded.
///
/// `compressed` must match how the signer address was derived from the
/// public key.
pub fn sign_message(key: &SigningKey, message: &str, compressed: bool) -> LedgerResult<String> {
    let digest = message_hash(message);
    let (signature, recovery) = key
        .sign_prehash_recoverable(digest.as_bytes())
        .map_err(|e| LedgerError::SignatureInvalid(e.to_string()))?;
    let mut compact = Vec::with_capacity(65);
    let header = 27 + recovery.to_byte() + if compressed { 4 } else { 0 };
    compact.push(header);
    compact.extend_from_slice(&signature.to_bytes());
    Ok(BASE64.encode(compact))
}

/// Verify a compact message signature against an address.
pub fn verify_message(
    address: &str,
    signature_b64: &str,
    message: &str,
    bech32_hrp: &str,
    base58_prefix: u8,
) -> LedgerResult<()> {
    let destination = Destination::decode(address, bech32_hrp, base58_prefix)
        .map_err(|e| LedgerError::SignatureInvalid(format!("bad signer address: {e}")))?;

    let bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| LedgerError::SignatureInvalid("malformed base64 signature".into()))?;
    if bytes.len() != 65 {
        return Err(LedgerError::SignatureInvalid(format!(
            "compact signature must be 65 bytes, got {}",
            bytes.len()
        )));
    }
    let header = bytes[0];
    if !(27..=34).contains(&header) {
        return Err(LedgerError::SignatureInvalid(format!(
            "bad recovery header {header}"
        )));
    }
    let recovery = RecoveryId::try_from((header - 27) & 3)
        .map_err(|_| LedgerError::SignatureInvalid("bad recovery id".into()))?;
    let compressed = header >= 31;

    let signature = Signature::from_slice(&bytes[1..])
        .map_err(|e| LedgerError::SignatureInvalid(e.to_string()))?;

    let digest = message_hash(message);
    let recovered = VerifyingKey::recover_from_prehash(digest.as_bytes(), &signature, recovery)
        .map_err(|_| LedgerError::SignatureInvalid("public key not recovered".into()))?;

    let encoded = recovered.to_encoded_point(compressed);
    let key_hash = hash160(encoded.as_bytes());

    let matches = match destination {
        Destination::PubkeyHash(h) => h == key_hash,
        Destination::WitnessKeyHash(h) => h == key_hash,
    };
    if !matches {
        return Err(LedgerError::SignatureInvalid(format!(
            "recovered key does not match {address}"
        )));
    }
    Ok(())
}

/// Fill in signer, timestamp and signature on an operation.
///
/// The signer address is derived from `key` as witness or legacy per
/// `witness`; the signature covers the canonical message with those fields
/// already set.
pub fn sign_operation(
    op: &mut TokenOperation,
    key: &SigningKey,
    witness: bool,
    timestamp: i64,
    bech32_hrp: &str,
    base58_prefix: u8,
) -> LedgerResult<()> {
    let pubkey = key.verifying_key().to_encoded_point(true);
    let destination = if witness {
        Destination::p2wpkh_for_pubkey(pubkey.as_bytes())
    } else {
        Destination::p2pkh_for_pubkey(pubkey.as_bytes())
    };
    op.signer = destination.encode(bech32_hrp, base58_prefix);
    op.timestamp = timestamp;
    op.signature = sign_message(key, &token_message(op), true)?;
    Ok(())
}
