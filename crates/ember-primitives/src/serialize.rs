//! Consensus wire serialisation.
//!
//! The byte layout here is consensus-critical: little-endian integers,
//! compact-size prefixed strings and vectors, and sorted maps encoded as a
//! compact-size count followed by key/value pairs. serde is deliberately not
//! used on this path.

use crate::hash::Hash256;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use thiserror::Error;

/// Errors produced while decoding wire data.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("non-canonical compact size")]
    NonCanonicalCompactSize,

    #[error("compact size too large: {0}")]
    OversizedCompactSize(u64),

    #[error("invalid utf-8 in string")]
    InvalidUtf8,

    #[error("unexpected trailing bytes")]
    TrailingBytes,

    #[error("invalid value: {0}")]
    InvalidValue(&'static str),
}

/// Limit on any decoded collection length, to bound allocations.
const MAX_DECODE_LEN: u64 = 8_000_000;

/// Types that can be written to the wire.
pub trait Encodable {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()>;
}

/// Types that can be read back from the wire.
pub trait Decodable: Sized {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError>;
}

/// Serialise a value to a fresh byte vector.
pub fn serialize<T: Encodable>(value: &T) -> Vec<u8> {
    let mut out = Vec::new();
    value.encode(&mut out).expect("writing to Vec cannot fail");
    out
}

/// Deserialise a value, requiring the input to be fully consumed.
pub fn deserialize<T: Decodable>(bytes: &[u8]) -> Result<T, DecodeError> {
    let mut cursor = bytes;
    let value = T::decode(&mut cursor)?;
    if !cursor.is_empty() {
        return Err(DecodeError::TrailingBytes);
    }
    Ok(value)
}

/// Write a compact-size length prefix.
pub fn write_compact_size<W: Write>(w: &mut W, n: u64) -> io::Result<()> {
    if n < 0xfd {
        w.write_all(&[n as u8])
    } else if n <= 0xffff {
        w.write_all(&[0xfd])?;
        w.write_all(&(n as u16).to_le_bytes())
    } else if n <= 0xffff_ffff {
        w.write_all(&[0xfe])?;
        w.write_all(&(n as u32).to_le_bytes())
    } else {
        w.write_all(&[0xff])?;
        w.write_all(&n.to_le_bytes())
    }
}

/// Read a canonical compact-size length prefix.
pub fn read_compact_size<R: Read>(r: &mut R) -> Result<u64, DecodeError> {
    let mut tag = [0u8; 1];
    r.read_exact(&mut tag)?;
    let n = match tag[0] {
        0xfd => {
            let mut b = [0u8; 2];
            r.read_exact(&mut b)?;
            let v = u16::from_le_bytes(b) as u64;
            if v < 0xfd {
                return Err(DecodeError::NonCanonicalCompactSize);
            }
            v
        }
        0xfe => {
            let mut b = [0u8; 4];
            r.read_exact(&mut b)?;
            let v = u32::from_le_bytes(b) as u64;
            if v <= 0xffff {
                return Err(DecodeError::NonCanonicalCompactSize);
            }
            v
        }
        0xff => {
            let mut b = [0u8; 8];
            r.read_exact(&mut b)?;
            let v = u64::from_le_bytes(b);
            if v <= 0xffff_ffff {
                return Err(DecodeError::NonCanonicalCompactSize);
            }
            v
        }
        v => v as u64,
    };
    if n > MAX_DECODE_LEN {
        return Err(DecodeError::OversizedCompactSize(n));
    }
    Ok(n)
}

macro_rules! impl_int {
    ($($t:ty),*) => {
        $(
            impl Encodable for $t {
                fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
                    w.write_all(&self.to_le_bytes())
                }
            }
            impl Decodable for $t {
                fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
                    let mut b = [0u8; std::mem::size_of::<$t>()];
                    r.read_exact(&mut b)?;
                    Ok(<$t>::from_le_bytes(b))
                }
            }
        )*
    };
}

impl_int!(u8, u16, u32, u64, i32, i64);

impl Encodable for bool {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        (*self as u8).encode(w)
    }
}

impl Decodable for bool {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(u8::decode(r)? != 0)
    }
}

impl Encodable for Hash256 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }
}

impl Decodable for Hash256 {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let mut b = [0u8; 32];
        r.read_exact(&mut b)?;
        Ok(Hash256(b))
    }
}

impl<T: Encodable> Encodable for Vec<T> {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        encode_vec(self, w)
    }
}

impl<T: Decodable> Decodable for Vec<T> {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        decode_vec(r)
    }
}

impl Encodable for String {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_compact_size(w, self.len() as u64)?;
        w.write_all(self.as_bytes())
    }
}

impl Decodable for String {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let len = read_compact_size(r)? as usize;
        let mut buf = vec![0u8; len];
        r.read_exact(&mut buf)?;
        String::from_utf8(buf).map_err(|_| DecodeError::InvalidUtf8)
    }
}

impl<K: Encodable, V: Encodable> Encodable for BTreeMap<K, V> {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        write_compact_size(w, self.len() as u64)?;
        for (k, v) in self {
            k.encode(w)?;
            v.encode(w)?;
        }
        Ok(())
    }
}

impl<K: Decodable + Ord, V: Decodable> Decodable for BTreeMap<K, V> {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let len = read_compact_size(r)?;
        let mut map = BTreeMap::new();
        for _ in 0..len {
            let k = K::decode(r)?;
            let v = V::decode(r)?;
            map.insert(k, v);
        }
        Ok(map)
    }
}

impl<A: Encodable, B: Encodable> Encodable for (A, B) {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.0.encode(w)?;
        self.1.encode(w)
    }
}

impl<A: Decodable, B: Decodable> Decodable for (A, B) {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok((A::decode(r)?, B::decode(r)?))
    }
}

impl<A: Encodable, B: Encodable, C: Encodable> Encodable for (A, B, C) {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.0.encode(w)?;
        self.1.encode(w)?;
        self.2.encode(w)
    }
}

impl<A: Decodable, B: Decodable, C: Decodable> Decodable for (A, B, C) {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok((A::decode(r)?, B::decode(r)?, C::decode(r)?))
    }
}

/// Encode a homogeneous slice with a compact-size count.
pub fn encode_vec<T: Encodable, W: Write>(items: &[T], w: &mut W) -> io::Result<()> {
    write_compact_size(w, items.len() as u64)?;
    for item in items {
        item.encode(w)?;
    }
    Ok(())
}

/// Decode a compact-size counted vector.
pub fn decode_vec<T: Decodable, R: Read>(r: &mut R) -> Result<Vec<T>, DecodeError> {
    let len = read_compact_size(r)?;
    let mut out = Vec::with_capacity(len.min(1024) as usize);
    for _ in 0..len {
        out.push(T::decode(r)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_size_boundaries() {
        for n in [0u64, 1, 0xfc, 0xfd, 0xffff, 0x10000, 1_000_000] {
            let mut buf = Vec::new();
            write_compact_size(&mut buf, n).unwrap();
            let mut cursor = buf.as_slice();
            assert_eq!(read_compact_size(&mut cursor).unwrap(), n);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn compact_size_caps_allocations() {
        let mut buf = Vec::new();
        write_compact_size(&mut buf, u64::MAX).unwrap();
        assert!(matches!(
            read_compact_size(&mut buf.as_slice()),
            Err(DecodeError::OversizedCompactSize(_))
        ));
    }

    #[test]
    fn compact_size_rejects_non_canonical() {
        // 0xfd prefix carrying a value that fits in one byte
        let buf = [0xfdu8, 0x10, 0x00];
        assert!(matches!(
            read_compact_size(&mut buf.as_slice()),
            Err(DecodeError::NonCanonicalCompactSize)
        ));
    }

    #[test]
    fn string_roundtrip() {
        let s = "ember token".to_string();
        let bytes = serialize(&s);
        assert_eq!(deserialize::<String>(&bytes).unwrap(), s);
    }

    #[test]
    fn map_roundtrip() {
        let mut m = BTreeMap::new();
        m.insert("a".to_string(), 1i64);
        m.insert("b".to_string(), -2i64);
        let bytes = serialize(&m);
        assert_eq!(deserialize::<BTreeMap<String, i64>>(&bytes).unwrap(), m);
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut bytes = serialize(&7u32);
        bytes.push(0);
        assert!(matches!(
            deserialize::<u32>(&bytes),
            Err(DecodeError::TrailingBytes)
        ));
    }
}
