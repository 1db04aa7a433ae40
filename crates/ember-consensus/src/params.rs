//! Chain parameters per network.
//!
//! Static consensus parameters that never change at runtime: proof-of-work
//! limits, fork activation heights, target spacing, the fee-burn window and
//! the protocol wallet addresses. `ChainParams::main()` is the production
//! network; `regtest()` relaxes the limits for tests and local mining.

use ember_primitives::hash::Hash160;
use ember_primitives::Destination;
use num_bigint::BigUint;

/// Default ceiling for assembled block weight.
pub const DEFAULT_BLOCK_MAX_WEIGHT: usize = 3_996_000;

/// Default minimum fee rate (base units per kvB) for block inclusion.
pub const DEFAULT_BLOCK_MIN_TX_FEE: i64 = 1_000;

/// Subsidy halving interval in blocks.
pub const SUBSIDY_HALVING_INTERVAL: i64 = 210_000;

/// Witness key hash of the protocol governance wallet.
const GOVERNANCE_KEY_HASH: [u8; 20] = [
    0x76, 0x31, 0x93, 0x4e, 0xd2, 0x05, 0x4a, 0xcf, 0xc2, 0x4c, 0x4c, 0x53, 0xa7, 0x33, 0xbb,
    0xfa, 0xf6, 0x0d, 0x25, 0xce,
];

/// Network identifier.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Network {
    Main,
    Testnet,
    Regtest,
}

/// Static consensus parameters for one network.
#[derive(Clone, Debug)]
pub struct ChainParams {
    pub network: Network,
    /// Proof-of-work limit for the SHA-256d era.
    pub pow_limit: BigUint,
    /// Proof-of-work limit once the memory-hard hash activates.
    pub pow_limit_yespower: BigUint,
    /// Height from which headers are hashed with the memory-hard function.
    pub yespower_fork_height: i64,
    /// First height of the DGW3 regime (and of the template-time clamp).
    pub difficulty_fork_height: i64,
    /// First height of the LWMA3 regime.
    pub next_difficulty_fork_height: i64,
    /// First height of the DGW3-Nova regime.
    pub next_difficulty_fork2_height: i64,
    /// Height from which the Nova emergency trigger is armed.
    pub next_difficulty_fork3_height: i64,
    /// Height of the v9 refinements (12-block window, medians).
    pub next_difficulty_fork5_height: i64,
    /// Target seconds between blocks.
    pub pow_target_spacing: i64,
    /// Legacy retarget window in seconds.
    pub pow_target_timespan: i64,
    pub pow_allow_min_difficulty_blocks: bool,
    pub pow_no_retargeting: bool,
    /// Height from which SegWit rules (and witness inclusion) are active.
    pub segwit_height: i64,
    /// Transaction fees are burned for heights in `1..=fee_burn_end_height`.
    pub fee_burn_end_height: i64,
    /// Governance wallet receiving the fixed basis-point reward share.
    pub governance_wallet: String,
    /// Optional node-operator wallet receiving its share when configured.
    pub node_operator_wallet: String,
    /// Height from which token operations are replayed.
    pub token_activation_height: i64,
    /// Human-readable part for bech32 addresses.
    pub bech32_hrp: String,
    /// Base58 version byte for legacy pay-to-pubkey-hash addresses.
    pub base58_pubkey_prefix: u8,
}

impl ChainParams {
    pub fn main() -> Self {
        ChainParams {
            network: Network::Main,
            pow_limit: limit_from_leading(0x00000000ffff0000u64),
            pow_limit_yespower: limit_from_leading(0x0000ffffffff0000u64),
            yespower_fork_height: 1,
            difficulty_fork_height: 2_000,
            next_difficulty_fork_height: 17_000,
            next_difficulty_fork2_height: 33_000,
            next_difficulty_fork3_height: 39_500,
            next_difficulty_fork5_height: 70_000,
            pow_target_spacing: 120,
            pow_target_timespan: 14 * 24 * 60 * 60,
            pow_allow_min_difficulty_blocks: false,
            pow_no_retargeting: false,
            segwit_height: 0,
            fee_burn_end_height: 50_000,
            governance_wallet: Destination::WitnessKeyHash(Hash160(GOVERNANCE_KEY_HASH))
                .encode("em", 33),
            node_operator_wallet: String::new(),
            token_activation_height: 60_000,
            bech32_hrp: "em".to_string(),
            base58_pubkey_prefix: 33,
        }
    }

    pub fn testnet() -> Self {
        ChainParams {
            network: Network::Testnet,
            pow_allow_min_difficulty_blocks: true,
            fee_burn_end_height: 500,
            token_activation_height: 100,
            governance_wallet: Destination::WitnessKeyHash(Hash160(GOVERNANCE_KEY_HASH))
                .encode("tm", 111),
            bech32_hrp: "tm".to_string(),
            base58_pubkey_prefix: 111,
            ..Self::main()
        }
    }

    pub fn regtest() -> Self {
        ChainParams {
            network: Network::Regtest,
            pow_limit: limit_from_leading(0x7fffffffffffffffu64),
            pow_limit_yespower: limit_from_leading(0x7fffffffffffffffu64),
            difficulty_fork_height: 1_000_000,
            next_difficulty_fork_height: 1_000_000,
            next_difficulty_fork2_height: 1_000_000,
            next_difficulty_fork3_height: 1_000_000,
            next_difficulty_fork5_height: 1_000_000,
            pow_allow_min_difficulty_blocks: true,
            pow_no_retargeting: true,
            fee_burn_end_height: 0,
            token_activation_height: 1,
            governance_wallet: String::new(),
            node_operator_wallet: String::new(),
            bech32_hrp: "emrt".to_string(),
            base58_pubkey_prefix: 111,
            ..Self::main()
        }
    }

    /// Blocks between legacy retargets.
    pub fn difficulty_adjustment_interval(&self) -> i64 {
        self.pow_target_timespan / self.pow_target_spacing
    }

    /// The proof-of-work limit active at `height`.
    pub fn active_pow_limit(&self, height: i64) -> &BigUint {
        if height >= self.yespower_fork_height {
            &self.pow_limit_yespower
        } else {
            &self.pow_limit
        }
    }

    /// Block subsidy at `height`: halves every `SUBSIDY_HALVING_INTERVAL`.
    pub fn block_subsidy(&self, height: i64) -> i64 {
        let halvings = height / SUBSIDY_HALVING_INTERVAL;
        if halvings >= 64 {
            return 0;
        }
        (50 * ember_primitives::COIN) >> halvings
    }

    /// Whether fees are burned at `height` rather than paid to the miner.
    pub fn burns_fees(&self, height: i64) -> bool {
        height >= 1 && height <= self.fee_burn_end_height
    }

    /// Whether blocks on this network are mined on demand (regtest).
    pub fn mine_blocks_on_demand(&self) -> bool {
        self.network == Network::Regtest
    }
}

/// Build a 256-bit limit from its 8 leading bytes, the rest filled with
/// zeros, matching the conventional powLimit notation.
fn limit_from_leading(leading: u64) -> BigUint {
    let mut bytes = [0u8; 32];
    bytes[..8].copy_from_slice(&leading.to_be_bytes());
    BigUint::from_bytes_be(&bytes)
}
