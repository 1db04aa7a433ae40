//! Chain manager: the glue between consensus, mining and the token ledger.
//!
//! Keeps the active chain index plus the connected blocks in memory,
//! validates and connects submitted blocks, and feeds every connected
//! block to the token ledger. Reorganisation and network sync live outside
//! this core.

use ember_consensus::{
    adjusted_time, check_block_validity, check_pow, target_to_compact, BlockIndexEntry,
    ChainParams, ChainState,
};
use ember_ledger::{BlockSource, TokenLedger};
use ember_mempool::Mempool;
use ember_mining::BlockSubmitter;
use ember_primitives::script::Script;
use ember_primitives::transaction::{Transaction, TxIn, TxOut};
use ember_primitives::{block_merkle_root, Block, BlockHeader, Hash256};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// In-memory chain manager.
pub struct ChainManager {
    params: ChainParams,
    chain: Arc<ChainState>,
    mempool: Arc<Mempool>,
    ledger: Arc<TokenLedger>,
    blocks: RwLock<HashMap<i64, Block>>,
}

impl ChainManager {
    pub fn new(
        params: ChainParams,
        chain: Arc<ChainState>,
        mempool: Arc<Mempool>,
        ledger: Arc<TokenLedger>,
    ) -> Self {
        ChainManager {
            params,
            chain,
            mempool,
            ledger,
            blocks: RwLock::new(HashMap::new()),
        }
    }

    pub fn chain(&self) -> Arc<ChainState> {
        Arc::clone(&self.chain)
    }

    /// Create and connect the genesis block if the chain is empty.
    pub fn ensure_genesis(&self) {
        if self.chain.read().tip().is_some() {
            return;
        }
        let genesis = genesis_block(&self.params);
        let entry = BlockIndexEntry {
            height: 0,
            time: genesis.header.time as i64,
            bits: genesis.header.bits,
            hash: genesis.hash(),
        };
        self.chain
            .write()
            .push(entry)
            .expect("empty chain accepts genesis");
        self.blocks.write().insert(0, genesis);
        info!(hash = %entry.hash, "genesis connected");
    }

    pub fn height(&self) -> i64 {
        self.chain.read().height()
    }

    fn connect_block(&self, block: Block) -> bool {
        let height;
        {
            let mut chain = self.chain.write();
            height = chain.height() + 1;
            if let Err(e) = check_block_validity(&block, &chain, &self.params, false) {
                warn!(height, error = %e, "block rejected");
                return false;
            }
            if let Err(e) = check_pow(
                &block.hash(),
                &block.header,
                block.header.bits,
                height,
                &self.params,
            ) {
                warn!(height, error = %e, "proof of work rejected");
                return false;
            }
            if chain
                .push(BlockIndexEntry {
                    height,
                    time: block.header.time as i64,
                    bits: block.header.bits,
                    hash: block.hash(),
                })
                .is_err()
            {
                return false;
            }
        }

        let confirmed: Vec<Hash256> = block.txdata.iter().skip(1).map(|tx| tx.txid()).collect();
        self.mempool.remove_confirmed(&confirmed);

        if height >= self.params.token_activation_height {
            self.ledger.process_block(&block, height);
        }

        info!(
            height,
            hash = %block.hash(),
            txs = block.txdata.len(),
            "block connected"
        );
        self.blocks.write().insert(height, block);
        true
    }
}

impl BlockSubmitter for ChainManager {
    fn submit_block(&self, block: Block) -> bool {
        self.connect_block(block)
    }
}

impl BlockSource for ChainManager {
    fn tip_height(&self) -> i64 {
        self.height()
    }

    fn block_at(&self, height: i64) -> Option<Block> {
        self.blocks.read().get(&height).cloned()
    }
}

/// Deterministic genesis block for the configured network.
fn genesis_block(params: &ChainParams) -> Block {
    let script_sig = Script::new()
        .push_int(0)
        .push_slice(b"ember genesis: the first spark");
    let coinbase = Transaction {
        version: 1,
        inputs: vec![TxIn::coinbase(script_sig)],
        outputs: vec![TxOut {
            value: params.block_subsidy(0),
            script_pubkey: Script::new(),
        }],
        lock_time: 0,
    };
    let mut block = Block {
        header: BlockHeader {
            version: 1,
            prev_block_hash: Hash256::ZERO,
            merkle_root: Hash256::ZERO,
            time: genesis_time(params),
            bits: target_to_compact(&params.pow_limit),
            nonce: 0,
        },
        txdata: vec![coinbase],
        witness_aux: Vec::new(),
    };
    block.header.merkle_root = block_merkle_root(&block);
    block
}

fn genesis_time(params: &ChainParams) -> u32 {
    match params.network {
        ember_consensus::Network::Regtest => (adjusted_time() - 24 * 60 * 60) as u32,
        _ => 1_690_000_000,
    }
}
