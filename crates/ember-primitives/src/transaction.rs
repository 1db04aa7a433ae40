//! Transactions with SegWit witness support.

use crate::amount::Amount;
use crate::hash::{sha256d, Hash256};
use crate::script::Script;
use crate::serialize::{
    decode_vec, encode_vec, read_compact_size, serialize, write_compact_size, Decodable,
    DecodeError, Encodable,
};
use crate::WITNESS_SCALE_FACTOR;
use std::io::{self, Read, Write};

/// Lock times below this are interpreted as block heights.
pub const LOCKTIME_THRESHOLD: u32 = 500_000_000;

/// A reference to a transaction output.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    /// The null outpoint used by coinbase inputs.
    pub fn null() -> Self {
        OutPoint {
            txid: Hash256::ZERO,
            vout: u32::MAX,
        }
    }

    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.vout == u32::MAX
    }
}

impl Encodable for OutPoint {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.txid.encode(w)?;
        self.vout.encode(w)
    }
}

impl Decodable for OutPoint {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(OutPoint {
            txid: Hash256::decode(r)?,
            vout: u32::decode(r)?,
        })
    }
}

/// A transaction input.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
    /// Witness stack; not covered by the txid.
    pub witness: Vec<Vec<u8>>,
}

impl TxIn {
    pub fn coinbase(script_sig: Script) -> Self {
        TxIn {
            prevout: OutPoint::null(),
            script_sig,
            sequence: u32::MAX,
            witness: Vec::new(),
        }
    }
}

/// A transaction output.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl Encodable for TxOut {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.value.encode(w)?;
        self.script_pubkey.encode(w)
    }
}

impl Decodable for TxOut {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(TxOut {
            value: Amount::decode(r)?,
            script_pubkey: Script::decode(r)?,
        })
    }
}

/// A transaction.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].prevout.is_null()
    }

    pub fn has_witness(&self) -> bool {
        self.inputs.iter().any(|input| !input.witness.is_empty())
    }

    /// Transaction id: double-SHA256 of the witness-stripped serialisation.
    pub fn txid(&self) -> Hash256 {
        let mut buf = Vec::new();
        self.encode_inner(&mut buf, false)
            .expect("writing to Vec cannot fail");
        sha256d(&buf)
    }

    /// Witness transaction id over the full serialisation.
    pub fn wtxid(&self) -> Hash256 {
        sha256d(&serialize(self))
    }

    /// Serialised size with witness data, in bytes.
    pub fn total_size(&self) -> usize {
        serialize(self).len()
    }

    /// Serialised size without witness data, in bytes.
    pub fn base_size(&self) -> usize {
        let mut buf = Vec::new();
        self.encode_inner(&mut buf, false)
            .expect("writing to Vec cannot fail");
        buf.len()
    }

    /// Block weight contribution: base×3 + total.
    pub fn weight(&self) -> usize {
        self.base_size() * (WITNESS_SCALE_FACTOR - 1) + self.total_size()
    }

    /// Virtual size, rounding weight up.
    pub fn vsize(&self) -> usize {
        (self.weight() + WITNESS_SCALE_FACTOR - 1) / WITNESS_SCALE_FACTOR
    }

    /// Finality check against the next block's height and the lock-time
    /// cutoff (MTP or block time depending on the active rule).
    pub fn is_final(&self, height: i64, time_cutoff: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let threshold = if self.lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            time_cutoff
        };
        if (self.lock_time as i64) < threshold {
            return true;
        }
        self.inputs.iter().all(|i| i.sequence == u32::MAX)
    }

    fn encode_inner<W: Write>(&self, w: &mut W, with_witness: bool) -> io::Result<()> {
        self.version.encode(w)?;
        let use_witness = with_witness && self.has_witness();
        if use_witness {
            // SegWit marker and flag
            w.write_all(&[0x00, 0x01])?;
        }
        write_compact_size(w, self.inputs.len() as u64)?;
        for input in &self.inputs {
            input.prevout.encode(w)?;
            input.script_sig.encode(w)?;
            input.sequence.encode(w)?;
        }
        encode_vec(&self.outputs, w)?;
        if use_witness {
            for input in &self.inputs {
                encode_vec(&input.witness, w)?;
            }
        }
        self.lock_time.encode(w)
    }
}

impl Encodable for Transaction {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.encode_inner(w, true)
    }
}

impl Decodable for Transaction {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        let version = i32::decode(r)?;
        let mut count = read_compact_size(r)?;
        let mut segwit = false;
        if count == 0 {
            // marker byte; a real input count of zero never appears
            let flag = u8::decode(r)?;
            if flag != 0x01 {
                return Err(DecodeError::InvalidValue("bad segwit flag"));
            }
            segwit = true;
            count = read_compact_size(r)?;
        }
        let mut inputs = Vec::with_capacity(count.min(1024) as usize);
        for _ in 0..count {
            inputs.push(TxIn {
                prevout: OutPoint::decode(r)?,
                script_sig: Script::decode(r)?,
                sequence: u32::decode(r)?,
                witness: Vec::new(),
            });
        }
        let outputs = decode_vec::<TxOut, R>(r)?;
        if segwit {
            for input in &mut inputs {
                input.witness = decode_vec::<Vec<u8>, R>(r)?;
            }
        }
        let lock_time = u32::decode(r)?;
        Ok(Transaction {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serialize::deserialize;

    fn sample_tx(witness: bool) -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxIn {
                prevout: OutPoint {
                    txid: sha256d(b"prev"),
                    vout: 1,
                },
                script_sig: Script::new().push_slice(&[1, 2, 3]),
                sequence: 0xffff_fffe,
                witness: if witness {
                    vec![vec![0xab; 71], vec![0x02; 33]]
                } else {
                    Vec::new()
                },
            }],
            outputs: vec![TxOut {
                value: 50_000,
                script_pubkey: Script::p2pkh(&crate::hash::Hash160([9u8; 20])),
            }],
            lock_time: 0,
        }
    }

    #[test]
    fn roundtrip_without_witness() {
        let tx = sample_tx(false);
        let bytes = serialize(&tx);
        assert_eq!(deserialize::<Transaction>(&bytes).unwrap(), tx);
        assert_eq!(tx.txid(), tx.wtxid());
    }

    #[test]
    fn roundtrip_with_witness() {
        let tx = sample_tx(true);
        let bytes = serialize(&tx);
        let back = deserialize::<Transaction>(&bytes).unwrap();
        assert_eq!(back, tx);
        assert_ne!(tx.txid(), tx.wtxid());
        // txid must not change when witness data is attached
        assert_eq!(tx.txid(), sample_tx(false).txid());
    }

    #[test]
    fn weight_accounts_for_witness_discount() {
        let plain = sample_tx(false);
        let witnessed = sample_tx(true);
        assert_eq!(plain.weight(), plain.base_size() * 4);
        assert!(witnessed.weight() < witnessed.total_size() * 4);
        assert!(witnessed.vsize() >= witnessed.base_size());
    }

    #[test]
    fn coinbase_detection() {
        let cb = Transaction {
            version: 1,
            inputs: vec![TxIn::coinbase(Script::new().push_int(42))],
            outputs: vec![],
            lock_time: 0,
        };
        assert!(cb.is_coinbase());
        assert!(!sample_tx(false).is_coinbase());
    }

    #[test]
    fn finality_rules() {
        let mut tx = sample_tx(false);
        assert!(tx.is_final(100, 0));

        tx.lock_time = 150;
        assert!(tx.is_final(151, 0));
        assert!(!tx.is_final(150, 0));

        // max sequence disables the lock time
        tx.inputs[0].sequence = u32::MAX;
        assert!(tx.is_final(100, 0));
    }
}
