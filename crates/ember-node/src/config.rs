//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network (main, testnet, regtest).
    pub network: String,
    /// Data directory.
    pub data_dir: PathBuf,
    /// Mining configuration.
    #[serde(default)]
    pub mining: MiningSection,
    /// Template assembly configuration.
    #[serde(default)]
    pub assembler: AssemblerSection,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            network: "main".to_string(),
            data_dir: PathBuf::from("./ember-data"),
            mining: MiningSection::default(),
            assembler: AssemblerSection::default(),
        }
    }
}

/// Mining configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MiningSection {
    /// Enable CPU mining.
    #[serde(default)]
    pub enabled: bool,
    /// Number of mining threads (0 = one per CPU).
    #[serde(default)]
    pub threads: usize,
    /// Payout address for the miner reward share.
    #[serde(default)]
    pub payout_address: String,
}

/// Template assembly configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblerSection {
    /// Block weight ceiling.
    #[serde(default = "default_blockmaxweight")]
    pub blockmaxweight: usize,
    /// Minimum fee rate (base units per kvB) for inclusion.
    #[serde(default = "default_blockmintxfee")]
    pub blockmintxfee: i64,
    /// Block version override; honoured on regtest only.
    #[serde(default)]
    pub blockversion: Option<i32>,
    /// Log each included transaction's fee rate.
    #[serde(default)]
    pub printpriority: bool,
}

impl Default for AssemblerSection {
    fn default() -> Self {
        AssemblerSection {
            blockmaxweight: default_blockmaxweight(),
            blockmintxfee: default_blockmintxfee(),
            blockversion: None,
            printpriority: false,
        }
    }
}

fn default_blockmaxweight() -> usize {
    ember_consensus::DEFAULT_BLOCK_MAX_WEIGHT
}

fn default_blockmintxfee() -> i64 {
    ember_consensus::DEFAULT_BLOCK_MIN_TX_FEE
}

impl NodeConfig {
    /// Load from a TOML file, falling back to defaults when it is absent.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(NodeConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Apply command-line overrides on top of the file values.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(network) = &args.network {
            self.network = network.clone();
        }
        if let Some(dir) = &args.data_dir {
            self.data_dir = dir.clone();
        }
        if args.mine {
            self.mining.enabled = true;
        }
        if let Some(threads) = args.mining_threads {
            self.mining.threads = threads;
        }
        if let Some(address) = &args.payout_address {
            self.mining.payout_address = address.clone();
        }
        if let Some(weight) = args.blockmaxweight {
            self.assembler.blockmaxweight = weight;
        }
        if let Some(fee) = args.blockmintxfee {
            self.assembler.blockmintxfee = fee;
        }
        if let Some(version) = args.blockversion {
            self.assembler.blockversion = Some(version);
        }
        if args.printpriority {
            self.assembler.printpriority = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = NodeConfig::default();
        assert_eq!(config.network, "main");
        assert!(!config.mining.enabled);
        assert_eq!(
            config.assembler.blockmaxweight,
            ember_consensus::DEFAULT_BLOCK_MAX_WEIGHT
        );
    }

    #[test]
    fn toml_roundtrip() {
        let config = NodeConfig::default();
        let text = toml::to_string(&config).unwrap();
        let back: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.network, config.network);
        assert_eq!(back.assembler.blockmintxfee, config.assembler.blockmintxfee);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let back: NodeConfig = toml::from_str(
            "network = \"regtest\"\ndata_dir = \"/tmp/x\"\n[mining]\nenabled = true\n",
        )
        .unwrap();
        assert_eq!(back.network, "regtest");
        assert!(back.mining.enabled);
        assert_eq!(back.assembler.blockmintxfee, 1_000);
    }
}
