//! The mining coordinator.
//!
//! A supervisor thread repeatedly builds a fresh template and fans it out to
//! N worker threads that race over disjoint strides of the 32-bit nonce
//! space. The first worker to satisfy the target submits the block through
//! the chain-processor seam and raises the `found_block` flag; everyone
//! else observes the flag and exits. Stale templates are simply abandoned:
//! the next round rebuilds from the latest tip.

use crate::assembler::BlockAssembler;
use crate::coinbase::{increment_extra_nonce, regenerate_commitments, ExtraNonceCounter};
use ember_consensus::yespower::YespowerContext;
use ember_consensus::{adjusted_time, compact_to_target, target_to_hash, ChainParams, ChainState};
use ember_mempool::Mempool;
use ember_primitives::{Block, Destination};
use parking_lot::Mutex;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Entry point for accepted blocks; the chain processor behind it is
/// thread-safe by contract.
pub trait BlockSubmitter: Send + Sync + 'static {
    /// Returns true when the block was accepted onto the chain.
    fn submit_block(&self, block: Block) -> bool;
}

/// Miner configuration.
#[derive(Debug, Clone)]
pub struct MinerConfig {
    /// Worker threads (0 = one per CPU).
    pub threads: usize,
    /// Payout address for the miner share of the reward.
    pub payout_address: String,
}

impl MinerConfig {
    pub fn effective_threads(&self) -> usize {
        if self.threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.threads
        }
    }
}

/// The mining coordinator.
pub struct Miner {
    params: ChainParams,
    config: MinerConfig,
    assembler: Arc<BlockAssembler>,
    chain: Arc<ChainState>,
    mempool: Arc<Mempool>,
    submitter: Arc<dyn BlockSubmitter>,
    generating: Arc<AtomicBool>,
    found_block: Arc<AtomicBool>,
    total_hashes: Arc<AtomicU64>,
    extra_nonce: Arc<Mutex<ExtraNonceCounter>>,
    shutdown: Arc<AtomicBool>,
}

impl Miner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        params: ChainParams,
        config: MinerConfig,
        assembler: BlockAssembler,
        chain: Arc<ChainState>,
        mempool: Arc<Mempool>,
        submitter: Arc<dyn BlockSubmitter>,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Miner {
            params,
            config,
            assembler: Arc::new(assembler),
            chain,
            mempool,
            submitter,
            generating: Arc::new(AtomicBool::new(false)),
            found_block: Arc::new(AtomicBool::new(false)),
            total_hashes: Arc::new(AtomicU64::new(0)),
            extra_nonce: Arc::new(Mutex::new(ExtraNonceCounter::new())),
            shutdown,
        }
    }

    pub fn is_generating(&self) -> bool {
        self.generating.load(Ordering::SeqCst)
    }

    pub fn total_hashes(&self) -> u64 {
        self.total_hashes.load(Ordering::Relaxed)
    }

    /// Stop after the current round; running workers exit at their next
    /// flag check.
    pub fn stop(&self) {
        self.generating.store(false, Ordering::SeqCst);
        info!("mining disabled");
    }

    /// Start the supervisor thread. Returns its join handle; the supervisor
    /// runs until `stop()`, shutdown, or a fatal setup error.
    pub fn start(&self) -> thread::JoinHandle<()> {
        self.generating.store(true, Ordering::SeqCst);
        let supervisor = SupervisorHandles {
            params: self.params.clone(),
            config: self.config.clone(),
            assembler: Arc::clone(&self.assembler),
            chain: Arc::clone(&self.chain),
            mempool: Arc::clone(&self.mempool),
            submitter: Arc::clone(&self.submitter),
            generating: Arc::clone(&self.generating),
            found_block: Arc::clone(&self.found_block),
            total_hashes: Arc::clone(&self.total_hashes),
            extra_nonce: Arc::clone(&self.extra_nonce),
            shutdown: Arc::clone(&self.shutdown),
        };
        thread::Builder::new()
            .name("mining-supervisor".to_string())
            .spawn(move || supervisor.run())
            .expect("spawning the supervisor thread")
    }
}

/// Everything the supervisor loop owns.
struct SupervisorHandles {
    params: ChainParams,
    config: MinerConfig,
    assembler: Arc<BlockAssembler>,
    chain: Arc<ChainState>,
    mempool: Arc<Mempool>,
    submitter: Arc<dyn BlockSubmitter>,
    generating: Arc<AtomicBool>,
    found_block: Arc<AtomicBool>,
    total_hashes: Arc<AtomicU64>,
    extra_nonce: Arc<Mutex<ExtraNonceCounter>>,
    shutdown: Arc<AtomicBool>,
}

impl SupervisorHandles {
    fn running(&self) -> bool {
        self.generating.load(Ordering::SeqCst) && !self.shutdown.load(Ordering::SeqCst)
    }

    fn run(self) {
        let num_threads = self.config.effective_threads();

        while self.running() {
            self.found_block.store(false, Ordering::SeqCst);
            self.total_hashes.store(0, Ordering::Relaxed);

            let dest = match Destination::decode(
                &self.config.payout_address,
                &self.params.bech32_hrp,
                self.params.base58_pubkey_prefix,
            ) {
                Ok(d) => d,
                Err(e) => {
                    error!(address = %self.config.payout_address, error = %e, "invalid payout address");
                    self.generating.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let template = match self.assembler.create_new_block(
                &self.chain,
                &self.mempool,
                &dest.script_pubkey(),
            ) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "template assembly failed");
                    thread::sleep(Duration::from_secs(1));
                    continue;
                }
            };

            info!(
                height = template.height,
                txs = template.block.txdata.len() - 1,
                threads = num_threads,
                "launching miner threads"
            );

            // The coinbase's reserved witness stack, restored after the
            // extra-nonce rebuild mutates the coinbase.
            let original_witness = template.block.txdata[0].inputs[0].witness.clone();

            for worker_id in 0..num_threads {
                let worker = WorkerHandles {
                    params: self.params.clone(),
                    chain: Arc::clone(&self.chain),
                    submitter: Arc::clone(&self.submitter),
                    generating: Arc::clone(&self.generating),
                    found_block: Arc::clone(&self.found_block),
                    total_hashes: Arc::clone(&self.total_hashes),
                    extra_nonce: Arc::clone(&self.extra_nonce),
                    shutdown: Arc::clone(&self.shutdown),
                    block: template.block.clone(),
                    height: template.height,
                    original_witness: original_witness.clone(),
                    worker_id,
                    num_threads,
                };
                // Workers are detached: they touch only thread-local state,
                // the shared atomics and the submission entry point.
                let _ = thread::Builder::new()
                    .name(format!("miner-{worker_id}"))
                    .spawn(move || worker.run());
            }

            while self.running() && !self.found_block.load(Ordering::SeqCst) {
                thread::sleep(Duration::from_millis(200));
            }

            if self.found_block.load(Ordering::SeqCst) {
                info!("restarting mining after found block");
                thread::sleep(Duration::from_millis(500));
            }
        }
        info!("mining supervisor stopped");
    }
}

/// Everything one worker owns.
struct WorkerHandles {
    params: ChainParams,
    chain: Arc<ChainState>,
    submitter: Arc<dyn BlockSubmitter>,
    generating: Arc<AtomicBool>,
    found_block: Arc<AtomicBool>,
    total_hashes: Arc<AtomicU64>,
    extra_nonce: Arc<Mutex<ExtraNonceCounter>>,
    shutdown: Arc<AtomicBool>,
    block: Block,
    height: i64,
    original_witness: Vec<Vec<u8>>,
    worker_id: usize,
    num_threads: usize,
}

impl WorkerHandles {
    fn should_stop(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
            || !self.generating.load(Ordering::SeqCst)
            || self.found_block.load(Ordering::SeqCst)
    }

    fn refresh_time(&self, block: &mut Block) {
        if let Some((_, _, mtp)) = self.chain.tip_info() {
            block.header.time = (mtp + 1).max(adjusted_time()) as u32;
        }
    }

    fn run(mut self) {
        debug!(worker = self.worker_id, "miner thread starting");
        let hash_ctx = YespowerContext::new();

        let mut block = std::mem::take(&mut self.block);
        self.refresh_time(&mut block);

        {
            let mut counter = self.extra_nonce.lock();
            increment_extra_nonce(&mut block, self.height, &mut counter);
        }

        if self.original_witness.len() == 1 && self.original_witness[0].len() == 32 {
            block.txdata[0].inputs[0].witness = self.original_witness.clone();
        }
        regenerate_commitments(&mut block);

        let (target, negative, overflow) = compact_to_target(block.header.bits);
        if negative || overflow {
            warn!(bits = block.header.bits, "unusable target, abandoning round");
            return;
        }

        let mut hashes_done: u64 = 0;
        let mut hash_start = Instant::now();

        let start_nonce: u32 = rand::thread_rng().gen();
        let mut nonce = start_nonce.wrapping_add(self.worker_id as u32);

        loop {
            if self.should_stop() {
                return;
            }

            hashes_done += 1;
            block.header.nonce = nonce;
            self.refresh_time(&mut block);

            let tip_height = self
                .chain
                .tip_info()
                .map(|(h, _, _)| h)
                .unwrap_or(self.height - 1);
            let next_height = tip_height + 1;

            let hash = if next_height >= self.params.yespower_fork_height {
                hash_ctx.hash(&block.header.pow_bytes(), next_height)
            } else {
                block.hash()
            };

            if target_to_hash(&hash) <= target {
                info!(
                    worker = self.worker_id,
                    hash = %hash,
                    height = next_height,
                    "valid block found"
                );
                let accepted = self.submitter.submit_block(block.clone());
                if accepted {
                    info!(worker = self.worker_id, "block accepted");
                } else {
                    error!(worker = self.worker_id, "block rejected by chain processor");
                }
                self.found_block.store(true, Ordering::SeqCst);
                self.total_hashes.fetch_add(hashes_done, Ordering::Relaxed);
                let elapsed = hash_start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    info!(
                        worker = self.worker_id,
                        rate = format!("{:.2} H/s", hashes_done as f64 / elapsed),
                        "final hashrate"
                    );
                }
                return;
            }

            if hashes_done % 1_000 == 0 {
                let elapsed = hash_start.elapsed();
                if elapsed >= Duration::from_secs(5) {
                    let rate = hashes_done as f64 / elapsed.as_secs_f64();
                    info!(
                        worker = self.worker_id,
                        rate = format!("{:.2} H/s", rate),
                        "hashrate"
                    );
                    self.total_hashes.fetch_add(hashes_done, Ordering::Relaxed);
                    hashes_done = 0;
                    hash_start = Instant::now();
                }
            }

            nonce = nonce.wrapping_add(self.num_threads as u32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::AssemblerOptions;
    use ember_consensus::{check_block_validity, check_pow, target_to_compact, BlockIndexEntry};
    use ember_primitives::hash::Hash160;
    use ember_primitives::sha256d;

    /// Accepts blocks that pass full validation and extends the chain.
    struct TestChainProcessor {
        params: ChainParams,
        chain: Arc<ChainState>,
    }

    impl BlockSubmitter for TestChainProcessor {
        fn submit_block(&self, block: Block) -> bool {
            let mut chain = self.chain.write();
            let height = chain.height() + 1;
            if check_block_validity(&block, &chain, &self.params, false).is_err() {
                return false;
            }
            if check_pow(
                &block.hash(),
                &block.header,
                block.header.bits,
                height,
                &self.params,
            )
            .is_err()
            {
                return false;
            }
            chain
                .push(BlockIndexEntry {
                    height,
                    time: block.header.time as i64,
                    bits: block.header.bits,
                    hash: block.hash(),
                })
                .is_ok()
        }
    }

    fn regtest_setup() -> (ChainParams, Arc<ChainState>, Arc<Mempool>) {
        let mut params = ChainParams::regtest();
        let gov = Destination::WitnessKeyHash(Hash160([0x01; 20]));
        params.governance_wallet = gov.encode(&params.bech32_hrp, params.base58_pubkey_prefix);
        let chain = Arc::new(ChainState::new());
        chain
            .write()
            .push(BlockIndexEntry {
                height: 0,
                time: adjusted_time() - 600,
                bits: target_to_compact(&params.pow_limit),
                hash: sha256d(b"regtest genesis"),
            })
            .unwrap();
        (params, chain, Arc::new(Mempool::new()))
    }

    #[test]
    fn rejects_invalid_payout_address() {
        let (params, chain, mempool) = regtest_setup();
        let submitter = Arc::new(TestChainProcessor {
            params: params.clone(),
            chain: Arc::clone(&chain),
        });
        let miner = Miner::new(
            params.clone(),
            MinerConfig {
                threads: 1,
                payout_address: "definitely-not-an-address".to_string(),
            },
            BlockAssembler::new(params, AssemblerOptions::default()),
            chain,
            mempool,
            submitter,
            Arc::new(AtomicBool::new(false)),
        );
        let handle = miner.start();
        handle.join().unwrap();
        // The supervisor logged and cleared the generating flag itself.
        assert!(!miner.is_generating());
    }

    #[test]
    fn mines_a_block_on_regtest() {
        let (params, chain, mempool) = regtest_setup();
        let submitter = Arc::new(TestChainProcessor {
            params: params.clone(),
            chain: Arc::clone(&chain),
        });
        let payout = Destination::PubkeyHash(Hash160([0x42; 20]))
            .encode(&params.bech32_hrp, params.base58_pubkey_prefix);
        let shutdown = Arc::new(AtomicBool::new(false));
        let miner = Miner::new(
            params.clone(),
            MinerConfig {
                threads: 1,
                payout_address: payout,
            },
            BlockAssembler::new(params, AssemblerOptions::default()),
            Arc::clone(&chain),
            mempool,
            submitter,
            Arc::clone(&shutdown),
        );
        let handle = miner.start();

        // The regtest limit accepts nearly every hash; a block lands fast.
        let deadline = Instant::now() + Duration::from_secs(60);
        while Instant::now() < deadline {
            if chain.read().height() >= 1 {
                break;
            }
            thread::sleep(Duration::from_millis(50));
        }
        let mined = chain.read().height();
        miner.stop();
        shutdown.store(true, Ordering::SeqCst);
        handle.join().unwrap();
        assert!(mined >= 1, "expected at least one mined block");
    }
}
