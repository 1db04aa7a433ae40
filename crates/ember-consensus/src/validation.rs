//! Block validity checks shared by template assembly and block connection.

use crate::chain::ChainIndex;
use crate::error::{ConsensusError, ConsensusResult};
use crate::params::ChainParams;
use crate::pow::check_pow;
use crate::target::compact_to_target;
use ember_primitives::{
    block_merkle_root, block_witness_merkle_root, sha256d, Block, Hash256, MAX_BLOCK_WEIGHT,
};
use num_traits::Zero;

/// Marker prefix of the witness-commitment output script payload.
pub const WITNESS_COMMITMENT_HEADER: [u8; 4] = [0xaa, 0x21, 0xa9, 0xed];

/// Compute the witness commitment for a block: SHA256d of the witness
/// merkle root concatenated with the coinbase's 32-byte reserved nonce.
pub fn compute_witness_commitment(block: &Block, nonce: &[u8; 32]) -> Hash256 {
    let witness_root = block_witness_merkle_root(block);
    let mut buf = [0u8; 64];
    buf[..32].copy_from_slice(&witness_root.0);
    buf[32..].copy_from_slice(nonce);
    sha256d(&buf)
}

/// Locate the witness-commitment output in the coinbase, if present.
/// The last matching output wins, as in the reference implementation.
pub fn witness_commitment_index(block: &Block) -> Option<usize> {
    let coinbase = block.txdata.first()?;
    let mut found = None;
    for (i, out) in coinbase.outputs.iter().enumerate() {
        let bytes = out.script_pubkey.as_bytes();
        if bytes.len() >= 38
            && bytes[0] == ember_primitives::script::OP_RETURN
            && bytes[1] == 36
            && bytes[2..6] == WITNESS_COMMITMENT_HEADER
        {
            found = Some(i);
        }
    }
    found
}

/// Run the validity tests an incoming block faces.
///
/// `verify_pow` is false for freshly assembled templates, whose nonce has
/// not been searched yet.
pub fn check_block_validity(
    block: &Block,
    chain: &ChainIndex,
    params: &ChainParams,
    verify_pow: bool,
) -> ConsensusResult<()> {
    let tip = chain
        .tip()
        .ok_or(ConsensusError::InsufficientHistory { height: 0 })?;
    let height = tip.height + 1;

    if block.header.prev_block_hash != tip.hash {
        return Err(ConsensusError::InvalidHeader(
            "previous block hash does not extend the tip".to_string(),
        ));
    }

    let (target, negative, overflow) = compact_to_target(block.header.bits);
    if negative || overflow || target.is_zero() || target > *params.active_pow_limit(height) {
        return Err(ConsensusError::TargetOutOfRange {
            bits: block.header.bits,
        });
    }

    if verify_pow {
        check_pow(&block.hash(), &block.header, block.header.bits, height, params)?;
    }

    let mtp = chain.median_time_past(tip.height);
    if (block.header.time as i64) <= mtp {
        return Err(ConsensusError::TimeTooOld {
            block_time: block.header.time as i64,
            median_time_past: mtp,
        });
    }

    let coinbase = block
        .coinbase()
        .ok_or_else(|| ConsensusError::InvalidBlock("first transaction is not a coinbase".into()))?;
    if block.txdata.iter().skip(1).any(|tx| tx.is_coinbase()) {
        return Err(ConsensusError::InvalidBlock(
            "multiple coinbase transactions".into(),
        ));
    }

    // Coinbase scriptSig must commit to the block height.
    match coinbase.inputs[0].script_sig.leading_int() {
        Some(h) if h == height => {}
        _ => {
            return Err(ConsensusError::InvalidBlock(
                "coinbase height commitment missing or wrong".into(),
            ))
        }
    }

    if block.header.merkle_root != block_merkle_root(block) {
        return Err(ConsensusError::MerkleMismatch);
    }

    let weight = block.weight();
    if weight > MAX_BLOCK_WEIGHT {
        return Err(ConsensusError::BlockTooHeavy {
            weight,
            max: MAX_BLOCK_WEIGHT,
        });
    }

    let time_cutoff = mtp;
    for tx in block.txdata.iter().skip(1) {
        if !tx.is_final(height, time_cutoff) {
            return Err(ConsensusError::NonFinalTransaction {
                txid: tx.txid().to_hex(),
            });
        }
    }

    // When any transaction carries witness data the coinbase must hold the
    // matching commitment and its 32-byte reserved witness nonce.
    if block.txdata.iter().any(|tx| tx.has_witness()) {
        let index = witness_commitment_index(block).ok_or_else(|| {
            ConsensusError::BadWitnessCommitment("commitment output missing".into())
        })?;
        let witness = &coinbase.inputs[0].witness;
        if witness.len() != 1 || witness[0].len() != 32 {
            return Err(ConsensusError::BadWitnessCommitment(
                "coinbase witness reserve must be a single 32-byte element".into(),
            ));
        }
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&witness[0]);
        let expected = compute_witness_commitment(block, &nonce);
        let script = coinbase.outputs[index].script_pubkey.as_bytes();
        if script[6..38] != expected.0 {
            return Err(ConsensusError::BadWitnessCommitment(
                "commitment does not match witness merkle root".into(),
            ));
        }
    }

    Ok(())
}
