//! Compact target (`nBits`) encoding.
//!
//! A base-256 floating representation of a 256-bit integer: the high byte
//! is an exponent (byte length), the low 23 bits a mantissa, bit 23 a sign
//! flag. Encoding and decoding follow the Bitcoin rules bit-for-bit,
//! including the mantissa shift when its top bit would read as a sign.

use ember_primitives::Hash256;
use num_bigint::BigUint;
use num_traits::Zero;

/// Decode compact bits into a target.
///
/// Returns `(target, negative, overflow)`; a block target is usable only
/// when it is non-zero, non-negative and not overflowed.
pub fn compact_to_target(bits: u32) -> (BigUint, bool, bool) {
    let size = (bits >> 24) as usize;
    let mut word = bits & 0x007f_ffff;

    let target = if size <= 3 {
        word >>= 8 * (3 - size);
        BigUint::from(word)
    } else {
        BigUint::from(word) << (8 * (size - 3))
    };

    let negative = word != 0 && (bits & 0x0080_0000) != 0;
    let overflow = word != 0
        && (size > 34 || (word > 0xff && size > 33) || (word > 0xffff && size > 32));

    (target, negative, overflow)
}

/// Encode a target as compact bits.
pub fn target_to_compact(target: &BigUint) -> u32 {
    if target.is_zero() {
        return 0;
    }
    let bytes = target.to_bytes_be();
    let mut size = bytes.len();

    let mut word: u32 = if size <= 3 {
        let mut w: u32 = 0;
        for &b in &bytes {
            w = (w << 8) | b as u32;
        }
        w << (8 * (3 - size))
    } else {
        ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | (bytes[2] as u32)
    };

    // The mantissa's top bit would flag the value as negative; shift it out
    // and grow the exponent instead.
    if word & 0x0080_0000 != 0 {
        word >>= 8;
        size += 1;
    }

    ((size as u32) << 24) | word
}

/// Interpret a hash as a big-endian 256-bit integer for target comparison.
pub fn target_to_hash(hash: &Hash256) -> BigUint {
    // Internal byte order is little-endian
    BigUint::from_bytes_le(hash.as_bytes())
}
