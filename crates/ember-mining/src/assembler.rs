//! Block template assembly.
//!
//! `BlockAssembler::create_new_block` locks the chain tip and the mempool
//! together, selects transaction packages by ancestor fee-rate, builds the
//! coinbase with the protocol reward split, seals the witness commitment
//! and finalises the header. The finished template is re-validated with the
//! same checks an incoming block would face.

use crate::coinbase::{append_witness_commitment, build_coinbase};
use crate::error::{MiningError, MiningResult};
use crate::{COINBASE_SIGOPS_RESERVE, COINBASE_WEIGHT_RESERVE};
use ember_consensus::{
    adjusted_time, check_block_validity, next_work_required, ChainParams, ChainState,
    DEFAULT_BLOCK_MAX_WEIGHT, DEFAULT_BLOCK_MIN_TX_FEE,
};
use ember_mempool::{AncestorScore, Mempool, PoolView};
use ember_primitives::{
    block_merkle_root, Amount, Block, BlockHeader, FeeRate, Hash256, Script,
    MAX_BLOCK_SIGOPS_COST, MAX_BLOCK_WEIGHT, WITNESS_SCALE_FACTOR,
};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, trace};

/// Version-bits top bits for block versions.
const VERSIONBITS_TOP_BITS: i32 = 0x2000_0000;

/// Selection gives up after this many consecutive package failures once the
/// block is nearly full.
const MAX_CONSECUTIVE_FAILURES: u32 = 1_000;

/// Assembler tuning options.
#[derive(Debug, Clone)]
pub struct AssemblerOptions {
    /// Ceiling for total block weight.
    pub block_max_weight: usize,
    /// Minimum package fee rate for inclusion.
    pub block_min_fee_rate: FeeRate,
    /// Version override; honoured on the regression network only.
    pub block_version: Option<i32>,
    /// Log each included transaction's fee rate.
    pub print_priority: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        AssemblerOptions {
            block_max_weight: DEFAULT_BLOCK_MAX_WEIGHT,
            block_min_fee_rate: FeeRate::from_per_kvb(DEFAULT_BLOCK_MIN_TX_FEE),
            block_version: None,
            print_priority: false,
        }
    }
}

/// A finished block candidate.
#[derive(Debug, Clone)]
pub struct BlockTemplate {
    pub block: Block,
    pub height: i64,
    /// Per-transaction fees; entry 0 covers the coinbase (zero inside the
    /// burn window, otherwise the negated fee total).
    pub tx_fees: Vec<Amount>,
    /// Per-transaction sigop costs; entry 0 covers the coinbase.
    pub tx_sigops: Vec<i64>,
    /// The witness-commitment script, empty when witness is excluded.
    pub coinbase_commitment: Vec<u8>,
}

/// Ancestor aggregates of a pool entry after earlier package inclusions
/// invalidated its cached values.
#[derive(Debug, Clone, Copy)]
struct ModifiedEntry {
    size_with_ancestors: u64,
    mod_fees_with_ancestors: Amount,
    sigops_with_ancestors: i64,
}

/// Block template assembler.
pub struct BlockAssembler {
    params: ChainParams,
    options: AssemblerOptions,
}

impl BlockAssembler {
    pub fn new(params: ChainParams, mut options: AssemblerOptions) -> Self {
        // Keep the weight ceiling sane regardless of configuration.
        options.block_max_weight = options
            .block_max_weight
            .clamp(4_000, MAX_BLOCK_WEIGHT - 4_000);
        BlockAssembler { params, options }
    }

    pub fn with_defaults(params: ChainParams) -> Self {
        Self::new(params, AssemblerOptions::default())
    }

    pub fn options(&self) -> &AssemblerOptions {
        &self.options
    }

    /// Assemble a candidate block paying `script_pubkey`.
    pub fn create_new_block(
        &self,
        chain_state: &ChainState,
        mempool: &Mempool,
        script_pubkey: &Script,
    ) -> MiningResult<BlockTemplate> {
        // Chain lock first, then the mempool view, held for the whole call.
        let chain = chain_state.read();
        let pool = mempool.view();

        let tip = *chain.tip().ok_or(MiningError::EmptyChain)?;
        let height = tip.height + 1;

        let mut version = VERSIONBITS_TOP_BITS;
        if self.params.mine_blocks_on_demand() {
            if let Some(v) = self.options.block_version {
                version = v;
            }
        }

        let mtp = chain.median_time_past(tip.height);
        let now = adjusted_time();
        let safe_time = (mtp + 1).max(now);
        let block_time = if height >= self.params.difficulty_fork_height {
            safe_time.min(mtp + 20 * 60)
        } else {
            now
        };
        debug!(height, time = block_time, mtp, "template time chosen");

        // Lock times validate against the median time past.
        let lock_time_cutoff = mtp;

        let include_witness = height >= self.params.segwit_height;

        let mut selection = Selection::new(&self.options);
        selection.add_package_txs(&pool, height, lock_time_cutoff, include_witness);
        let Selection {
            txs: selected,
            tx_fees: mut fees_vec,
            tx_sigops: mut sigops_vec,
            total_fees,
            block_weight,
            block_sigops,
            packages,
            ..
        } = selection;

        info!(
            height,
            txs = selected.len(),
            packages,
            weight = block_weight,
            sigops = block_sigops,
            fees = total_fees,
            "package selection complete"
        );

        let (coinbase, coinbase_fee_entry) =
            build_coinbase(height, script_pubkey, total_fees, &self.params);

        let mut block = Block {
            header: BlockHeader {
                version,
                prev_block_hash: tip.hash,
                merkle_root: Hash256::ZERO,
                time: block_time as u32,
                bits: 0,
                nonce: 0,
            },
            txdata: Vec::with_capacity(selected.len() + 1),
            witness_aux: Vec::new(),
        };
        block.txdata.push(coinbase);
        block.txdata.extend(selected);

        let coinbase_commitment = if include_witness {
            append_witness_commitment(&mut block)
        } else {
            block.txdata[0].inputs[0].witness.clear();
            Vec::new()
        };

        fees_vec.insert(0, coinbase_fee_entry);
        sigops_vec.insert(0, COINBASE_SIGOPS_RESERVE);

        // Finalise the header.
        let update_time = (mtp + 1).max(adjusted_time());
        if update_time > block.header.time as i64 {
            block.header.time = update_time as u32;
        }
        block.header.bits = next_work_required(&chain, block.header.time as i64, &self.params)
            .map_err(MiningError::TemplateInvalid)?;
        block.header.nonce = 0;
        block.header.merkle_root = block_merkle_root(&block);

        // The same tests an incoming block faces, minus the nonce search.
        check_block_validity(&block, &chain, &self.params, false)?;

        debug!(
            height,
            weight = block.weight(),
            txs = block.txdata.len(),
            "template assembled"
        );

        Ok(BlockTemplate {
            block,
            height,
            tx_fees: fees_vec,
            tx_sigops: sigops_vec,
            coinbase_commitment,
        })
    }
}

/// Working state of one package-selection run.
struct Selection<'a> {
    options: &'a AssemblerOptions,
    txs: Vec<ember_primitives::Transaction>,
    tx_fees: Vec<Amount>,
    tx_sigops: Vec<i64>,
    in_block: HashSet<Hash256>,
    block_weight: u64,
    block_sigops: i64,
    total_fees: Amount,
    packages: u32,
}

impl<'a> Selection<'a> {
    fn new(options: &'a AssemblerOptions) -> Self {
        Selection {
            options,
            txs: Vec::new(),
            tx_fees: Vec::new(),
            tx_sigops: Vec::new(),
            in_block: HashSet::new(),
            block_weight: COINBASE_WEIGHT_RESERVE,
            block_sigops: COINBASE_SIGOPS_RESERVE,
            total_fees: 0,
            packages: 0,
        }
    }

    fn test_package(&self, package_size: u64, package_sigops: i64) -> bool {
        if self.block_weight + WITNESS_SCALE_FACTOR as u64 * package_size
            >= self.options.block_max_weight as u64
        {
            return false;
        }
        if self.block_sigops + package_sigops >= MAX_BLOCK_SIGOPS_COST {
            return false;
        }
        true
    }

    fn test_package_transactions(
        &self,
        pool: &PoolView,
        package: &HashSet<Hash256>,
        height: i64,
        lock_time_cutoff: i64,
        include_witness: bool,
    ) -> bool {
        for txid in package {
            let entry = match pool.get(txid) {
                Some(e) => e,
                None => return false,
            };
            if !entry.tx.is_final(height, lock_time_cutoff) {
                trace!(txid = %txid, "rejected: not final");
                return false;
            }
            if !include_witness && entry.tx.has_witness() {
                trace!(txid = %txid, "rejected: witness before activation");
                return false;
            }
        }
        true
    }

    /// Walk the ancestor-score index and the modified set, adding the best
    /// affordable package each round.
    fn add_package_txs(
        &mut self,
        pool: &PoolView,
        height: i64,
        lock_time_cutoff: i64,
        include_witness: bool,
    ) {
        let order = pool.ancestor_score_order();
        let mut modified: HashMap<Hash256, ModifiedEntry> = HashMap::new();
        let mut failed: HashSet<Hash256> = HashSet::new();
        let mut index_pos = 0usize;
        let mut consecutive_failures = 0u32;

        while index_pos < order.len() || !modified.is_empty() {
            if index_pos < order.len() {
                let candidate = order[index_pos];
                // Entries already placed, already failed, or shadowed by a
                // fresher modified entry are skipped in the index walk.
                if self.in_block.contains(&candidate)
                    || failed.contains(&candidate)
                    || modified.contains_key(&candidate)
                {
                    index_pos += 1;
                    continue;
                }
            }

            let best_modified = best_modified_entry(&modified);
            let (txid, package, using_modified) = if index_pos >= order.len() {
                match best_modified {
                    Some((txid, entry)) => (txid, entry, true),
                    None => break,
                }
            } else {
                let index_txid = order[index_pos];
                let index_entry = pool.get(&index_txid).expect("index entries exist");
                let index_package = ModifiedEntry {
                    size_with_ancestors: index_entry.size_with_ancestors,
                    mod_fees_with_ancestors: index_entry.mod_fees_with_ancestors,
                    sigops_with_ancestors: index_entry.sigops_with_ancestors,
                };
                match best_modified {
                    // Ties go to the modified set: its aggregates are fresher.
                    Some((mod_txid, mod_entry))
                        if !score_of(&index_package, index_txid)
                            .beats(&score_of(&mod_entry, mod_txid)) =>
                    {
                        (mod_txid, mod_entry, true)
                    }
                    _ => {
                        index_pos += 1;
                        (index_txid, index_package, false)
                    }
                }
            };

            debug_assert!(!self.in_block.contains(&txid));

            let package_size = package.size_with_ancestors;
            let package_fees = package.mod_fees_with_ancestors;
            let package_sigops = package.sigops_with_ancestors;

            if package_fees < self.options.block_min_fee_rate.fee(package_size) {
                trace!(txid = %txid, fees = package_fees, "package below minimum fee rate");
                if using_modified {
                    modified.remove(&txid);
                    failed.insert(txid);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && self.block_weight > self.options.block_max_weight as u64 - 4_000
                {
                    break;
                }
                continue;
            }

            if !self.test_package(package_size, package_sigops) {
                trace!(txid = %txid, "package exceeds block limits");
                if using_modified {
                    modified.remove(&txid);
                    failed.insert(txid);
                }
                consecutive_failures += 1;
                if consecutive_failures > MAX_CONSECUTIVE_FAILURES
                    && self.block_weight > self.options.block_max_weight as u64 - 4_000
                {
                    break;
                }
                continue;
            }

            // The whole package: ancestors not yet in the block, plus self.
            let mut package_set = pool.calculate_ancestors(&txid);
            package_set.retain(|a| !self.in_block.contains(a));
            package_set.insert(txid);

            if !self.test_package_transactions(
                pool,
                &package_set,
                height,
                lock_time_cutoff,
                include_witness,
            ) {
                if using_modified {
                    modified.remove(&txid);
                    failed.insert(txid);
                }
                continue;
            }

            consecutive_failures = 0;

            // Parents precede children when sorted by ancestor count.
            let mut sorted: Vec<Hash256> = package_set.iter().copied().collect();
            sorted.sort_by_key(|id| {
                let e = pool.get(id).expect("package entries exist");
                (e.count_with_ancestors, *id)
            });

            for id in &sorted {
                let entry = pool.get(id).expect("package entries exist");
                self.txs.push((*entry.tx).clone());
                self.tx_fees.push(entry.fee);
                self.tx_sigops.push(entry.sigop_cost);
                self.block_weight += entry.weight;
                self.block_sigops += entry.sigop_cost;
                self.total_fees += entry.fee;
                self.in_block.insert(*id);
                modified.remove(id);
                if self.options.print_priority {
                    let rate = entry.modified_fee * 1000 / entry.vsize().max(1) as i64;
                    info!(txid = %id, fee_rate = rate, "included transaction");
                }
            }

            self.packages += 1;
            self.update_packages_for_added(pool, &package_set, &mut modified);
        }
    }

    /// Subtract the just-added transactions from every not-yet-included
    /// descendant's cached ancestor aggregates.
    fn update_packages_for_added(
        &self,
        pool: &PoolView,
        added: &HashSet<Hash256>,
        modified: &mut HashMap<Hash256, ModifiedEntry>,
    ) {
        for added_txid in added {
            let added_entry = match pool.get(added_txid) {
                Some(e) => e,
                None => continue,
            };
            for descendant in pool.calculate_descendants(added_txid) {
                if added.contains(&descendant) {
                    continue;
                }
                let slot = modified.entry(descendant).or_insert_with(|| {
                    let e = pool.get(&descendant).expect("descendants exist");
                    ModifiedEntry {
                        size_with_ancestors: e.size_with_ancestors,
                        mod_fees_with_ancestors: e.mod_fees_with_ancestors,
                        sigops_with_ancestors: e.sigops_with_ancestors,
                    }
                });
                slot.size_with_ancestors -= added_entry.vsize();
                slot.mod_fees_with_ancestors -= added_entry.modified_fee;
                slot.sigops_with_ancestors -= added_entry.sigop_cost;
            }
        }
    }
}

fn score_of(entry: &ModifiedEntry, txid: Hash256) -> AncestorScore {
    AncestorScore::new(entry.mod_fees_with_ancestors, entry.size_with_ancestors, txid)
}

fn best_modified_entry(
    modified: &HashMap<Hash256, ModifiedEntry>,
) -> Option<(Hash256, ModifiedEntry)> {
    modified
        .iter()
        .min_by(|a, b| score_of(a.1, *a.0).cmp(&score_of(b.1, *b.0)))
        .map(|(txid, entry)| (*txid, *entry))
}
