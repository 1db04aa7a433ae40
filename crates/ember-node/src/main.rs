//! Ember node entry point.

use anyhow::{bail, Result};
use clap::Parser;
use ember_consensus::{ChainParams, ChainState};
use ember_ledger::{LedgerStore, TokenLedger};
use ember_mempool::Mempool;
use ember_mining::{AssemblerOptions, BlockAssembler, Miner, MinerConfig};
use ember_primitives::FeeRate;
use ember_storage::Database;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::ChainManager;

/// Ember blockchain node.
#[derive(Parser, Debug)]
#[command(name = "ember-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "ember-node.toml")]
    config: PathBuf,

    /// Network to run on (main, testnet, regtest)
    #[arg(short, long)]
    network: Option<String>,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Enable CPU mining
    #[arg(long)]
    mine: bool,

    /// Number of mining threads (0 = one per CPU)
    #[arg(long)]
    mining_threads: Option<usize>,

    /// Payout address for the miner reward share
    #[arg(long)]
    payout_address: Option<String>,

    /// Block weight ceiling for assembled templates
    #[arg(long)]
    blockmaxweight: Option<usize>,

    /// Minimum fee rate (base units per kvB) for template inclusion
    #[arg(long)]
    blockmintxfee: Option<i64>,

    /// Block version override (regtest only)
    #[arg(long)]
    blockversion: Option<i32>,

    /// Log each included transaction's fee rate
    #[arg(long)]
    printpriority: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = NodeConfig::load(&args.config)?;
    config.apply_args(&args);

    let params = match config.network.as_str() {
        "main" => ChainParams::main(),
        "testnet" => ChainParams::testnet(),
        "regtest" => ChainParams::regtest(),
        other => bail!("unknown network: {other}"),
    };
    info!(network = %config.network, data_dir = %config.data_dir.display(), "starting ember-node");

    std::fs::create_dir_all(&config.data_dir)?;
    let db = Arc::new(Database::open(config.data_dir.join("ledger"))?);
    let ledger = Arc::new(TokenLedger::new(
        params.clone(),
        Some(LedgerStore::new(db)),
    ));
    ledger.load()?;

    let chain = Arc::new(ChainState::new());
    let mempool = Arc::new(Mempool::new());
    let manager = Arc::new(ChainManager::new(
        params.clone(),
        Arc::clone(&chain),
        Arc::clone(&mempool),
        Arc::clone(&ledger),
    ));
    manager.ensure_genesis();

    let shutdown = Arc::new(AtomicBool::new(false));

    if config.mining.enabled {
        let assembler = BlockAssembler::new(
            params.clone(),
            AssemblerOptions {
                block_max_weight: config.assembler.blockmaxweight,
                block_min_fee_rate: FeeRate::from_per_kvb(config.assembler.blockmintxfee),
                block_version: config.assembler.blockversion,
                print_priority: config.assembler.printpriority,
            },
        );
        let miner = Miner::new(
            params,
            MinerConfig {
                threads: config.mining.threads,
                payout_address: config.mining.payout_address.clone(),
            },
            assembler,
            chain,
            mempool,
            manager,
            shutdown,
        );
        let supervisor = miner.start();
        info!("mining started; interrupt the process to stop");
        let _ = supervisor.join();
    } else {
        info!("node idle (no mining enabled); interrupt the process to stop");
        loop {
            std::thread::sleep(std::time::Duration::from_secs(3600));
        }
    }

    Ok(())
}
