//! Block headers and blocks.

use crate::hash::{sha256d, Hash256};
use crate::serialize::{decode_vec, encode_vec, serialize, Decodable, DecodeError, Encodable};
use crate::transaction::Transaction;
use crate::WITNESS_SCALE_FACTOR;
use std::io::{self, Read, Write};

/// Serialised header length: the exact input to proof-of-work hashing.
pub const HEADER_SIZE: usize = 80;

/// An 80-byte block header.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    /// Double-SHA256 hash of the serialised header.
    pub fn hash(&self) -> Hash256 {
        sha256d(&serialize(self))
    }

    /// The exact 80 bytes fed to the PoW hash function.
    pub fn pow_bytes(&self) -> [u8; HEADER_SIZE] {
        let bytes = serialize(self);
        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        let mut out = [0u8; HEADER_SIZE];
        out.copy_from_slice(&bytes);
        out
    }
}

impl Encodable for BlockHeader {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.version.encode(w)?;
        self.prev_block_hash.encode(w)?;
        self.merkle_root.encode(w)?;
        self.time.encode(w)?;
        self.bits.encode(w)?;
        self.nonce.encode(w)
    }
}

impl Decodable for BlockHeader {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(BlockHeader {
            version: i32::decode(r)?,
            prev_block_hash: Hash256::decode(r)?,
            merkle_root: Hash256::decode(r)?,
            time: u32::decode(r)?,
            bits: u32::decode(r)?,
            nonce: u32::decode(r)?,
        })
    }
}

/// A full block: header, transactions and (for post-SegWit blocks) an
/// auxiliary witness vector carried alongside the coinbase.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct Block {
    pub header: BlockHeader,
    pub txdata: Vec<Transaction>,
    /// Auxiliary witness data; serialised only for non-genesis blocks whose
    /// coinbase carries witness data.
    pub witness_aux: Vec<Vec<u8>>,
}

impl Block {
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    pub fn coinbase(&self) -> Option<&Transaction> {
        self.txdata.first().filter(|tx| tx.is_coinbase())
    }

    fn serializes_witness_aux(&self) -> bool {
        !self.header.prev_block_hash.is_zero()
            && !self.txdata.is_empty()
            && self.txdata[0].has_witness()
    }

    /// Total block weight including all transactions.
    pub fn weight(&self) -> usize {
        let base = {
            let mut buf = Vec::new();
            self.header
                .encode(&mut buf)
                .expect("writing to Vec cannot fail");
            let mut size = buf.len();
            // compact size of the tx count plus base tx sizes
            size += compact_size_len(self.txdata.len() as u64);
            size += self.txdata.iter().map(|tx| tx.base_size()).sum::<usize>();
            size
        };
        let total = serialize(self).len();
        base * (WITNESS_SCALE_FACTOR - 1) + total
    }
}

fn compact_size_len(n: u64) -> usize {
    match n {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x10000..=0xffff_ffff => 5,
        _ => 9,
    }
}

impl Encodable for Block {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.encode(w)?;
        encode_vec(&self.txdata, w)?;
        if self.serializes_witness_aux() {
            encode_vec(&self.witness_aux, w)?;
        }
        Ok(())
    }
}

impl Decodable for Block {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let header = BlockHeader::decode(r)?;
        let txdata = decode_vec::<Transaction, R>(r)?;
        let mut block = Block {
            header,
            txdata,
            witness_aux: Vec::new(),
        };
        if block.serializes_witness_aux() {
            block.witness_aux = decode_vec::<Vec<u8>, R>(r)?;
        }
        Ok(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::Script;
    use crate::serialize::deserialize;
    use crate::transaction::{TxIn, TxOut};

    fn header() -> BlockHeader {
        BlockHeader {
            version: 4,
            prev_block_hash: sha256d(b"parent"),
            merkle_root: sha256d(b"root"),
            time: 1_700_000_000,
            bits: 0x1d00ffff,
            nonce: 12345,
        }
    }

    #[test]
    fn header_serialises_to_80_bytes() {
        let bytes = serialize(&header());
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(deserialize::<BlockHeader>(&bytes).unwrap(), header());
    }

    #[test]
    fn header_field_order() {
        let bytes = serialize(&header());
        assert_eq!(&bytes[0..4], &4i32.to_le_bytes());
        assert_eq!(&bytes[4..36], sha256d(b"parent").as_bytes());
        assert_eq!(&bytes[36..68], sha256d(b"root").as_bytes());
        assert_eq!(&bytes[68..72], &1_700_000_000u32.to_le_bytes());
        assert_eq!(&bytes[72..76], &0x1d00ffffu32.to_le_bytes());
        assert_eq!(&bytes[76..80], &12345u32.to_le_bytes());
    }

    #[test]
    fn block_roundtrip_with_witness_aux() {
        let mut coinbase = Transaction {
            version: 1,
            inputs: vec![TxIn::coinbase(Script::new().push_int(5))],
            outputs: vec![TxOut {
                value: 50 * crate::COIN,
                script_pubkey: Script::new(),
            }],
            lock_time: 0,
        };
        coinbase.inputs[0].witness = vec![vec![0u8; 32]];
        let block = Block {
            header: header(),
            txdata: vec![coinbase],
            witness_aux: vec![vec![0xaa; 36]],
        };
        let bytes = serialize(&block);
        assert_eq!(deserialize::<Block>(&bytes).unwrap(), block);
    }

    #[test]
    fn genesis_block_omits_witness_aux() {
        let mut block = Block {
            header: header(),
            txdata: Vec::new(),
            witness_aux: vec![vec![1, 2, 3]],
        };
        block.header.prev_block_hash = Hash256::ZERO;
        let bytes = serialize(&block);
        let back = deserialize::<Block>(&bytes).unwrap();
        assert!(back.witness_aux.is_empty());
    }
}
