//! Hash types and helpers.
//!
//! `Hash256` wraps a 32-byte digest stored in internal (little-endian) byte
//! order; the `Display` impl prints the conventional reversed hex form.

use sha2::{Digest, Sha256};
use std::fmt;

/// A 256-bit hash (double-SHA256 output, txids, block hashes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash.
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Construct from raw internal-order bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }

    /// Parse from display-order (reversed) hex.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        bytes.reverse();
        Ok(Hash256(bytes))
    }

    /// Hex string in display order (reversed bytes).
    pub fn to_hex(&self) -> String {
        let mut rev = self.0;
        rev.reverse();
        hex::encode(rev)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

/// A 160-bit hash (public key hashes).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash160(pub [u8; 20]);

impl Hash160 {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Debug for Hash160 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash160({})", hex::encode(self.0))
    }
}

/// Double SHA-256.
pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    Hash256(out)
}

/// Single SHA-256.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(data));
    out
}

/// RIPEMD160(SHA256(data)), the standard key-hash construction.
pub fn hash160(data: &[u8]) -> Hash160 {
    use ripemd::Ripemd160;
    let sha = Sha256::digest(data);
    let mut out = [0u8; 20];
    out.copy_from_slice(&Ripemd160::digest(sha));
    Hash160(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256d_known_vector() {
        // sha256d("hello") is a fixed value
        let h = sha256d(b"hello");
        assert_eq!(
            hex::encode(h.0),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d50"
        );
    }

    #[test]
    fn hex_roundtrip_is_reversed() {
        let h = sha256d(b"abc");
        let parsed = Hash256::from_hex(&h.to_hex()).unwrap();
        assert_eq!(h, parsed);
        // display order reverses internal order
        let mut rev = h.0;
        rev.reverse();
        assert_eq!(h.to_hex(), hex::encode(rev));
    }

    #[test]
    fn hash160_length() {
        let h = hash160(b"pubkey bytes");
        assert_eq!(h.as_bytes().len(), 20);
    }
}
