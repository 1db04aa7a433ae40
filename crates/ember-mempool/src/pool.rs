//! Transaction pool implementation.

use crate::entry::MempoolEntry;
use crate::error::{MempoolError, MempoolResult};
use ember_primitives::transaction::OutPoint;
use ember_primitives::{Amount, Hash256, Transaction};
use parking_lot::{RwLock, RwLockReadGuard};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Pool internals guarded by one lock.
///
/// The entries, the parent/child edges, the spent-outpoint index and the
/// ancestor aggregates must be mutually consistent, so they live behind a
/// single `RwLock` rather than per-map sharding.
#[derive(Default)]
pub struct PoolView {
    entries: HashMap<Hash256, MempoolEntry>,
    parents: HashMap<Hash256, HashSet<Hash256>>,
    children: HashMap<Hash256, HashSet<Hash256>>,
    spent_outpoints: HashMap<OutPoint, Hash256>,
}

impl PoolView {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, txid: &Hash256) -> Option<&MempoolEntry> {
        self.entries.get(txid)
    }

    pub fn contains(&self, txid: &Hash256) -> bool {
        self.entries.contains_key(txid)
    }

    /// The pool transaction already spending `outpoint`, if any.
    pub fn spending_tx(&self, outpoint: &OutPoint) -> Option<Hash256> {
        self.spent_outpoints.get(outpoint).copied()
    }

    /// All txids sorted by descending ancestor fee-rate.
    pub fn ancestor_score_order(&self) -> Vec<Hash256> {
        let mut scored: Vec<_> = self
            .entries
            .values()
            .map(|e| (e.ancestor_score(), e.txid()))
            .collect();
        scored.sort_by(|a, b| a.0.cmp(&b.0));
        scored.into_iter().map(|(_, txid)| txid).collect()
    }

    /// The in-pool ancestor closure of `txid`, excluding `txid` itself.
    pub fn calculate_ancestors(&self, txid: &Hash256) -> HashSet<Hash256> {
        let mut out = HashSet::new();
        let mut stack: Vec<Hash256> = self
            .parents
            .get(txid)
            .map(|p| p.iter().copied().collect())
            .unwrap_or_default();
        while let Some(parent) = stack.pop() {
            if out.insert(parent) {
                if let Some(grand) = self.parents.get(&parent) {
                    stack.extend(grand.iter().copied());
                }
            }
        }
        out
    }

    /// The in-pool descendant closure of `txid`, excluding `txid` itself.
    pub fn calculate_descendants(&self, txid: &Hash256) -> HashSet<Hash256> {
        let mut out = HashSet::new();
        let mut stack: Vec<Hash256> = self
            .children
            .get(txid)
            .map(|c| c.iter().copied().collect())
            .unwrap_or_default();
        while let Some(child) = stack.pop() {
            if out.insert(child) {
                if let Some(grand) = self.children.get(&child) {
                    stack.extend(grand.iter().copied());
                }
            }
        }
        out
    }
}

/// The shared mempool. Readers take a consistent view for the duration of
/// template assembly.
#[derive(Default)]
pub struct Mempool {
    inner: RwLock<PoolView>,
}

impl Mempool {
    pub fn new() -> Self {
        Mempool {
            inner: RwLock::new(PoolView::default()),
        }
    }

    /// Lock the pool for reading; template assembly holds this guard
    /// together with the chain lock for the whole call.
    pub fn view(&self) -> RwLockReadGuard<'_, PoolView> {
        self.inner.read()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Add a transaction with its fee and sigop cost. Ancestor aggregates
    /// are computed from the transactions already in the pool; parents must
    /// be added before children. An input already spent by another pool
    /// transaction is a conflict.
    pub fn add(&self, tx: Transaction, fee: Amount, sigop_cost: i64) -> MempoolResult<()> {
        let mut pool = self.inner.write();
        let txid = tx.txid();
        if pool.entries.contains_key(&txid) {
            return Err(MempoolError::AlreadyExists(txid.to_hex()));
        }

        for input in &tx.inputs {
            if pool.spent_outpoints.contains_key(&input.prevout) {
                return Err(MempoolError::Conflict(format!(
                    "{}:{}",
                    input.prevout.txid.to_hex(),
                    input.prevout.vout
                )));
            }
        }

        let parents: HashSet<Hash256> = tx
            .inputs
            .iter()
            .map(|input| input.prevout.txid)
            .filter(|parent| pool.entries.contains_key(parent))
            .collect();

        let weight = tx.weight() as u64;
        let vsize = tx.vsize() as u64;
        let mut entry = MempoolEntry {
            tx: Arc::new(tx),
            weight,
            sigop_cost,
            fee,
            modified_fee: fee,
            count_with_ancestors: 1,
            size_with_ancestors: vsize,
            mod_fees_with_ancestors: fee,
            sigops_with_ancestors: sigop_cost,
        };

        // Fold the full ancestor closure into the aggregates.
        let mut closure = HashSet::new();
        let mut stack: Vec<Hash256> = parents.iter().copied().collect();
        while let Some(parent) = stack.pop() {
            if closure.insert(parent) {
                if let Some(grand) = pool.parents.get(&parent) {
                    stack.extend(grand.iter().copied());
                }
            }
        }
        for ancestor in &closure {
            let a = &pool.entries[ancestor];
            entry.count_with_ancestors += 1;
            entry.size_with_ancestors += a.vsize();
            entry.mod_fees_with_ancestors += a.modified_fee;
            entry.sigops_with_ancestors += a.sigop_cost;
        }

        for parent in &parents {
            pool.children.entry(*parent).or_default().insert(txid);
        }
        for input in &entry.tx.inputs {
            pool.spent_outpoints.insert(input.prevout, txid);
        }
        pool.parents.insert(txid, parents);
        pool.entries.insert(txid, entry);
        debug!(txid = %txid, count = pool.entries.len(), "transaction added to mempool");
        Ok(())
    }

    /// Adjust a transaction's modified fee by `delta`, propagating the
    /// change into every descendant's ancestor aggregates.
    pub fn prioritise(&self, txid: &Hash256, delta: Amount) -> MempoolResult<()> {
        let mut pool = self.inner.write();
        if !pool.entries.contains_key(txid) {
            return Err(MempoolError::NotFound(txid.to_hex()));
        }
        let descendants = pool.calculate_descendants(txid);
        let entry = pool.entries.get_mut(txid).unwrap();
        entry.modified_fee += delta;
        entry.mod_fees_with_ancestors += delta;
        for desc in descendants {
            if let Some(d) = pool.entries.get_mut(&desc) {
                d.mod_fees_with_ancestors += delta;
            }
        }
        Ok(())
    }

    /// Drop transactions confirmed in a block, rebuilding the aggregates of
    /// everything left behind.
    pub fn remove_confirmed(&self, txids: &[Hash256]) {
        let mut pool = self.inner.write();
        for txid in txids {
            let Some(entry) = pool.entries.remove(txid) else {
                continue;
            };
            for input in &entry.tx.inputs {
                if pool.spent_outpoints.get(&input.prevout) == Some(txid) {
                    pool.spent_outpoints.remove(&input.prevout);
                }
            }
            if let Some(parents) = pool.parents.remove(txid) {
                for parent in parents {
                    if let Some(children) = pool.children.get_mut(&parent) {
                        children.remove(txid);
                    }
                }
            }
            if let Some(children) = pool.children.remove(txid) {
                for child in children {
                    if let Some(parents) = pool.parents.get_mut(&child) {
                        parents.remove(txid);
                    }
                }
            }
        }
        // Aggregates of survivors are recomputed from scratch; confirmed
        // ancestors no longer count.
        let order: Vec<Hash256> = pool.entries.keys().copied().collect();
        for txid in order {
            let closure = pool.calculate_ancestors(&txid);
            let (mut count, mut size, mut fees, mut sigops) = {
                let e = &pool.entries[&txid];
                (1u64, e.vsize(), e.modified_fee, e.sigop_cost)
            };
            for ancestor in &closure {
                let a = &pool.entries[ancestor];
                count += 1;
                size += a.vsize();
                fees += a.modified_fee;
                sigops += a.sigop_cost;
            }
            let e = pool.entries.get_mut(&txid).unwrap();
            e.count_with_ancestors = count;
            e.size_with_ancestors = size;
            e.mod_fees_with_ancestors = fees;
            e.sigops_with_ancestors = sigops;
        }
        debug!(count = pool.entries.len(), "mempool trimmed after block");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_primitives::script::Script;
    use ember_primitives::transaction::{OutPoint, TxIn, TxOut};
    use ember_primitives::sha256d;

    fn tx_spending(prev: OutPoint, salt: u8) -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![TxIn {
                prevout: prev,
                script_sig: Script::new().push_slice(&[salt]),
                sequence: u32::MAX,
                witness: Vec::new(),
            }],
            outputs: vec![TxOut {
                value: 1_000,
                script_pubkey: Script::new().push_slice(&[salt]),
            }],
            lock_time: 0,
        }
    }

    fn confirmed_outpoint(salt: u8) -> OutPoint {
        OutPoint {
            txid: sha256d(&[salt]),
            vout: 0,
        }
    }

    #[test]
    fn ancestor_aggregates_accumulate() {
        let pool = Mempool::new();
        let parent = tx_spending(confirmed_outpoint(1), 1);
        let parent_id = parent.txid();
        let parent_vsize = parent.vsize() as u64;
        pool.add(parent, 100, 4).unwrap();

        let child = tx_spending(OutPoint { txid: parent_id, vout: 0 }, 2);
        let child_vsize = child.vsize() as u64;
        let child_id = child.txid();
        pool.add(child, 10_000, 8).unwrap();

        let view = pool.view();
        let c = view.get(&child_id).unwrap();
        assert_eq!(c.count_with_ancestors, 2);
        assert_eq!(c.size_with_ancestors, parent_vsize + child_vsize);
        assert_eq!(c.mod_fees_with_ancestors, 10_100);
        assert_eq!(c.sigops_with_ancestors, 12);

        assert_eq!(view.calculate_ancestors(&child_id).len(), 1);
        assert_eq!(view.calculate_descendants(&parent_id).len(), 1);
    }

    #[test]
    fn duplicate_rejected() {
        let pool = Mempool::new();
        let tx = tx_spending(confirmed_outpoint(1), 1);
        pool.add(tx.clone(), 100, 4).unwrap();
        assert!(matches!(
            pool.add(tx, 100, 4),
            Err(MempoolError::AlreadyExists(_))
        ));
    }

    #[test]
    fn conflicting_spend_rejected() {
        let pool = Mempool::new();
        let first = tx_spending(confirmed_outpoint(1), 1);
        let first_id = first.txid();
        pool.add(first, 100, 4).unwrap();

        // Different transaction, same outpoint.
        let rival = tx_spending(confirmed_outpoint(1), 2);
        assert!(matches!(
            pool.add(rival, 500, 4),
            Err(MempoolError::Conflict(_))
        ));
        assert_eq!(
            pool.view().spending_tx(&confirmed_outpoint(1)),
            Some(first_id)
        );

        // Once the first spend confirms, the outpoint frees up.
        pool.remove_confirmed(&[first_id]);
        assert_eq!(pool.view().spending_tx(&confirmed_outpoint(1)), None);
        let rival = tx_spending(confirmed_outpoint(1), 2);
        pool.add(rival, 500, 4).unwrap();
    }

    #[test]
    fn score_order_uses_ancestor_feerate() {
        let pool = Mempool::new();
        // Low-fee parent, very-high-fee child, medium standalone.
        let parent = tx_spending(confirmed_outpoint(1), 1);
        let parent_id = parent.txid();
        pool.add(parent, 10, 1).unwrap();
        let child = tx_spending(OutPoint { txid: parent_id, vout: 0 }, 2);
        pool.add(child, 100_000, 1).unwrap();
        let standalone = tx_spending(confirmed_outpoint(9), 3);
        let standalone_id = standalone.txid();
        pool.add(standalone, 5_000, 1).unwrap();

        let view = pool.view();
        let order = view.ancestor_score_order();
        // The child's ancestor rate is diluted by its parent but still tops
        // the standalone's.
        assert_eq!(order.len(), 3);
        assert_ne!(order[0], parent_id);
        let _ = standalone_id;
    }

    #[test]
    fn remove_confirmed_rebuilds_aggregates() {
        let pool = Mempool::new();
        let parent = tx_spending(confirmed_outpoint(1), 1);
        let parent_id = parent.txid();
        pool.add(parent, 100, 4).unwrap();
        let child = tx_spending(OutPoint { txid: parent_id, vout: 0 }, 2);
        let child_id = child.txid();
        let child_vsize = child.vsize() as u64;
        pool.add(child, 200, 8).unwrap();

        pool.remove_confirmed(&[parent_id]);
        let view = pool.view();
        assert!(!view.contains(&parent_id));
        let c = view.get(&child_id).unwrap();
        assert_eq!(c.count_with_ancestors, 1);
        assert_eq!(c.size_with_ancestors, child_vsize);
        assert_eq!(c.mod_fees_with_ancestors, 200);
        assert_eq!(c.sigops_with_ancestors, 8);
    }

    #[test]
    fn prioritise_propagates_to_descendants() {
        let pool = Mempool::new();
        let parent = tx_spending(confirmed_outpoint(1), 1);
        let parent_id = parent.txid();
        pool.add(parent, 100, 4).unwrap();
        let child = tx_spending(OutPoint { txid: parent_id, vout: 0 }, 2);
        let child_id = child.txid();
        pool.add(child, 200, 8).unwrap();

        pool.prioritise(&parent_id, 1_000).unwrap();
        let view = pool.view();
        assert_eq!(view.get(&parent_id).unwrap().modified_fee, 1_100);
        assert_eq!(view.get(&child_id).unwrap().mod_fees_with_ancestors, 1_300);
    }
}
