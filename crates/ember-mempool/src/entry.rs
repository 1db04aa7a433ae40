//! Mempool entries.

use crate::ordering::AncestorScore;
use ember_primitives::{Amount, Hash256, Transaction};
use std::sync::Arc;

/// A transaction in the pool with its precomputed ancestor aggregates.
#[derive(Debug, Clone)]
pub struct MempoolEntry {
    pub tx: Arc<Transaction>,
    /// Weight units (virtual size × 4).
    pub weight: u64,
    /// Signature-operation cost.
    pub sigop_cost: i64,
    /// Raw fee paid by the transaction.
    pub fee: Amount,
    /// Fee after prioritisation deltas.
    pub modified_fee: Amount,
    /// Number of in-pool ancestors including this transaction.
    pub count_with_ancestors: u64,
    /// Virtual size of this transaction plus all in-pool ancestors.
    pub size_with_ancestors: u64,
    /// Modified fees of this transaction plus all in-pool ancestors.
    pub mod_fees_with_ancestors: Amount,
    /// Sigop cost of this transaction plus all in-pool ancestors.
    pub sigops_with_ancestors: i64,
}

impl MempoolEntry {
    pub fn txid(&self) -> Hash256 {
        self.tx.txid()
    }

    /// Virtual size of this transaction alone.
    pub fn vsize(&self) -> u64 {
        self.weight / ember_primitives::WITNESS_SCALE_FACTOR as u64
    }

    /// The ancestor-score sort key for the pool index.
    pub fn ancestor_score(&self) -> AncestorScore {
        AncestorScore::new(
            self.mod_fees_with_ancestors,
            self.size_with_ancestors,
            self.txid(),
        )
    }
}
