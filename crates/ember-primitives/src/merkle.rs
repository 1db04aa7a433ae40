//! Merkle tree construction for transaction and witness commitments.

use crate::block::Block;
use crate::hash::{sha256d, Hash256};

/// Compute a merkle root over a list of leaf hashes.
///
/// Follows the Bitcoin convention: an odd level duplicates its last entry,
/// and an empty list yields the zero hash.
pub fn merkle_root(mut hashes: Vec<Hash256>) -> Hash256 {
    if hashes.is_empty() {
        return Hash256::ZERO;
    }
    while hashes.len() > 1 {
        if hashes.len() % 2 != 0 {
            hashes.push(*hashes.last().unwrap());
        }
        hashes = hashes
            .chunks(2)
            .map(|pair| {
                let mut buf = [0u8; 64];
                buf[..32].copy_from_slice(&pair[0].0);
                buf[32..].copy_from_slice(&pair[1].0);
                sha256d(&buf)
            })
            .collect();
    }
    hashes[0]
}

/// Merkle root over the block's transaction ids.
pub fn block_merkle_root(block: &Block) -> Hash256 {
    merkle_root(block.txdata.iter().map(|tx| tx.txid()).collect())
}

/// Merkle root over witness transaction ids; the coinbase leaf is zero by
/// convention.
pub fn block_witness_merkle_root(block: &Block) -> Hash256 {
    let leaves = block
        .txdata
        .iter()
        .enumerate()
        .map(|(i, tx)| if i == 0 { Hash256::ZERO } else { tx.wtxid() })
        .collect();
    merkle_root(leaves)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_leaf_is_root() {
        let h = sha256d(b"leaf");
        assert_eq!(merkle_root(vec![h]), h);
    }

    #[test]
    fn empty_is_zero() {
        assert_eq!(merkle_root(vec![]), Hash256::ZERO);
    }

    #[test]
    fn odd_level_duplicates_last() {
        let a = sha256d(b"a");
        let b = sha256d(b"b");
        let c = sha256d(b"c");
        let root3 = merkle_root(vec![a, b, c]);
        let root4 = merkle_root(vec![a, b, c, c]);
        assert_eq!(root3, root4);
    }

    #[test]
    fn order_matters() {
        let a = sha256d(b"a");
        let b = sha256d(b"b");
        assert_ne!(merkle_root(vec![a, b]), merkle_root(vec![b, a]));
    }
}
