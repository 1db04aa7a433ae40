//! Coinbase construction and the extra-nonce machinery.

use ember_consensus::validation::{
    compute_witness_commitment, witness_commitment_index, WITNESS_COMMITMENT_HEADER,
};
use ember_consensus::ChainParams;
use ember_primitives::{
    block_merkle_root, Amount, Block, Destination, Hash256, Script, Transaction, TxIn, TxOut,
};
use tracing::debug;

/// Governance share of the block reward, in basis points.
pub const GOV_BPS: Amount = 7_300;

/// Node-operator share of the block reward, in basis points.
pub const OP_BPS: Amount = 500;

const BPS_DENOM: Amount = 10_000;

/// Fixed sentinel following the height in a template coinbase scriptSig;
/// replaced by the extra nonce once mining starts.
pub const COINBASE_SENTINEL: [u8; 8] = [0xf0, 0x00, 0x00, 0x0f, 0xf1, 0x11, 0x11, 0x1f];

/// Build the coinbase transaction for a new block.
///
/// Output 0 pays the miner, output 1 the governance wallet and output 2
/// the node operator when one is configured. An invalid governance address
/// collapses the split into a single full-reward output to the miner.
///
/// Returns the transaction and the fee entry for the template's fee vector
/// (zero inside the burn window, otherwise the negated collected fees).
pub fn build_coinbase(
    height: i64,
    script_pubkey: &Script,
    fees: Amount,
    params: &ChainParams,
) -> (Transaction, Amount) {
    let burn_fees = params.burns_fees(height);
    let mut block_reward = params.block_subsidy(height);
    if !burn_fees {
        block_reward += fees;
    }

    let governance_reward = block_reward * GOV_BPS / BPS_DENOM;
    let operator_dest = Destination::decode(
        &params.node_operator_wallet,
        &params.bech32_hrp,
        params.base58_pubkey_prefix,
    )
    .ok();
    let operator_reward = if operator_dest.is_some() {
        block_reward * OP_BPS / BPS_DENOM
    } else {
        0
    };

    let script_sig = Script::new().push_int(height).push_slice(&COINBASE_SENTINEL);
    let mut input = TxIn::coinbase(script_sig);
    // 32-byte reserved witness nonce
    input.witness = vec![vec![0u8; 32]];

    let mut outputs = vec![TxOut {
        value: block_reward - governance_reward - operator_reward,
        script_pubkey: script_pubkey.clone(),
    }];

    let governance_dest = Destination::decode(
        &params.governance_wallet,
        &params.bech32_hrp,
        params.base58_pubkey_prefix,
    )
    .ok();
    match governance_dest {
        Some(dest) => {
            outputs.push(TxOut {
                value: governance_reward,
                script_pubkey: dest.script_pubkey(),
            });
            if let Some(op) = operator_dest {
                outputs.push(TxOut {
                    value: operator_reward,
                    script_pubkey: op.script_pubkey(),
                });
            }
        }
        None => {
            // Fallback: the miner takes the whole reward.
            outputs[0].value = block_reward;
        }
    }

    debug!(
        height,
        reward = block_reward,
        governance = governance_reward,
        operator = operator_reward,
        "coinbase built"
    );

    let tx = Transaction {
        version: 1,
        inputs: vec![input],
        outputs,
        lock_time: 0,
    };
    (tx, if burn_fees { 0 } else { -fees })
}

/// Append the witness-commitment output to the coinbase and return the
/// commitment script bytes.
pub fn append_witness_commitment(block: &mut Block) -> Vec<u8> {
    let nonce = coinbase_witness_nonce(block).unwrap_or([0u8; 32]);
    let commitment = compute_witness_commitment(block, &nonce);
    let mut payload = Vec::with_capacity(36);
    payload.extend_from_slice(&WITNESS_COMMITMENT_HEADER);
    payload.extend_from_slice(&commitment.0);
    let script = Script::op_return(&payload);
    block.txdata[0].outputs.push(TxOut {
        value: 0,
        script_pubkey: script.clone(),
    });
    script.0
}

fn coinbase_witness_nonce(block: &Block) -> Option<[u8; 32]> {
    let witness = &block.txdata.first()?.inputs.first()?.witness;
    if witness.len() == 1 && witness[0].len() == 32 {
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&witness[0]);
        Some(nonce)
    } else {
        None
    }
}

/// Drop any existing witness-commitment output, recompute it and rebuild
/// the merkle root. Run after every coinbase mutation.
pub fn regenerate_commitments(block: &mut Block) {
    if let Some(index) = witness_commitment_index(block) {
        block.txdata[0].outputs.remove(index);
        append_witness_commitment(block);
    }
    block.header.merkle_root = block_merkle_root(block);
}

/// The process-wide extra-nonce counter, reset whenever mining moves to a
/// new previous block.
#[derive(Debug, Default)]
pub struct ExtraNonceCounter {
    last_prev_block: Hash256,
    value: u32,
}

impl ExtraNonceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self, prev_block: Hash256) -> u32 {
        if self.last_prev_block != prev_block {
            self.value = 0;
            self.last_prev_block = prev_block;
        }
        self.value += 1;
        self.value
    }
}

/// Rewrite the coinbase scriptSig to `(height, extra_nonce)` and rebuild
/// the merkle root. Returns the nonce used.
pub fn increment_extra_nonce(
    block: &mut Block,
    height: i64,
    counter: &mut ExtraNonceCounter,
) -> u32 {
    let extra_nonce = counter.next(block.header.prev_block_hash);
    let script_sig = Script::new().push_int(height).push_int(extra_nonce as i64);
    debug_assert!(script_sig.len() <= 100);
    block.txdata[0].inputs[0].script_sig = script_sig;
    block.header.merkle_root = block_merkle_root(block);
    extra_nonce
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_primitives::{sha256d, COIN};

    fn miner_script() -> Script {
        Destination::PubkeyHash(ember_primitives::hash::Hash160([0x42; 20])).script_pubkey()
    }

    fn params_with_wallets(operator: bool) -> ChainParams {
        let mut params = ChainParams::main();
        let gov = Destination::PubkeyHash(ember_primitives::hash::Hash160([0x01; 20]));
        params.governance_wallet = gov.encode(&params.bech32_hrp, params.base58_pubkey_prefix);
        if operator {
            let op = Destination::WitnessKeyHash(ember_primitives::hash::Hash160([0x02; 20]));
            params.node_operator_wallet =
                op.encode(&params.bech32_hrp, params.base58_pubkey_prefix);
        }
        params
    }

    #[test]
    fn subsidy_split_with_operator() {
        // height 100: subsidy 50 coins, fees 1 coin, outside the burn
        // window, valid governance and operator wallets.
        let mut params = params_with_wallets(true);
        params.fee_burn_end_height = 0;
        let (tx, fee_entry) = build_coinbase(100, &miner_script(), COIN, &params);

        assert_eq!(tx.outputs.len(), 3);
        let reward = 51 * COIN;
        let gov = reward * 73 / 100;
        let op = reward * 5 / 100;
        assert_eq!(tx.outputs[1].value, gov);
        assert_eq!(tx.outputs[2].value, op);
        assert_eq!(tx.outputs[0].value, reward - gov - op);
        assert_eq!(tx.outputs.iter().map(|o| o.value).sum::<Amount>(), reward);
        assert_eq!(tx.outputs[1].value, 3_723_000_000);
        assert_eq!(tx.outputs[2].value, 255_000_000);
        assert_eq!(tx.outputs[0].value, 1_122_000_000);
        assert_eq!(fee_entry, -COIN);
    }

    #[test]
    fn burn_window_pays_subsidy_only() {
        let params = params_with_wallets(true); // burn until 50_000
        let (tx, fee_entry) = build_coinbase(100, &miner_script(), COIN, &params);
        assert_eq!(
            tx.outputs.iter().map(|o| o.value).sum::<Amount>(),
            50 * COIN
        );
        assert_eq!(fee_entry, 0);
    }

    #[test]
    fn burn_boundary() {
        let mut params = params_with_wallets(false);
        params.fee_burn_end_height = 100;
        let (at_end, _) = build_coinbase(100, &miner_script(), COIN, &params);
        let (past_end, _) = build_coinbase(101, &miner_script(), COIN, &params);
        assert_eq!(
            at_end.outputs.iter().map(|o| o.value).sum::<Amount>(),
            50 * COIN
        );
        assert_eq!(
            past_end.outputs.iter().map(|o| o.value).sum::<Amount>(),
            51 * COIN
        );
    }

    #[test]
    fn invalid_governance_falls_back_to_single_output() {
        let mut params = ChainParams::main();
        params.governance_wallet = "garbage".to_string();
        params.node_operator_wallet = String::new();
        params.fee_burn_end_height = 0;
        let (tx, _) = build_coinbase(100, &miner_script(), COIN, &params);
        assert_eq!(tx.outputs.len(), 1);
        assert_eq!(tx.outputs[0].value, 51 * COIN);
    }

    #[test]
    fn scriptsig_is_height_then_sentinel() {
        let params = params_with_wallets(false);
        let (tx, _) = build_coinbase(250, &miner_script(), 0, &params);
        let script = &tx.inputs[0].script_sig;
        assert_eq!(script.leading_int(), Some(250));
        let ops: Vec<_> = script.iter_ops().collect();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].1, &COINBASE_SENTINEL);
        // witness reserve
        assert_eq!(tx.inputs[0].witness, vec![vec![0u8; 32]]);
    }

    #[test]
    fn extra_nonce_resets_on_new_parent() {
        let params = params_with_wallets(false);
        let (coinbase, _) = build_coinbase(5, &miner_script(), 0, &params);
        let mut block = Block {
            header: Default::default(),
            txdata: vec![coinbase],
            witness_aux: Vec::new(),
        };
        block.header.prev_block_hash = sha256d(b"tip-a");

        let mut counter = ExtraNonceCounter::new();
        assert_eq!(increment_extra_nonce(&mut block, 5, &mut counter), 1);
        assert_eq!(increment_extra_nonce(&mut block, 5, &mut counter), 2);

        // New parent: counter restarts.
        block.header.prev_block_hash = sha256d(b"tip-b");
        assert_eq!(increment_extra_nonce(&mut block, 5, &mut counter), 1);

        // scriptSig now carries (height, extra_nonce)
        let ops: Vec<_> = block.txdata[0].inputs[0].script_sig.iter_ops().collect();
        assert_eq!(ops.len(), 2);
        assert_eq!(block.txdata[0].inputs[0].script_sig.leading_int(), Some(5));
        assert_eq!(block.header.merkle_root, block_merkle_root(&block));
    }

    #[test]
    fn commitment_survives_extra_nonce_rebuild() {
        let params = params_with_wallets(false);
        let (coinbase, _) = build_coinbase(5, &miner_script(), 0, &params);
        let mut block = Block {
            header: Default::default(),
            txdata: vec![coinbase],
            witness_aux: Vec::new(),
        };
        block.header.prev_block_hash = sha256d(b"tip");
        let script = append_witness_commitment(&mut block);
        assert_eq!(script[0], ember_primitives::script::OP_RETURN);
        block.header.merkle_root = block_merkle_root(&block);

        let mut counter = ExtraNonceCounter::new();
        increment_extra_nonce(&mut block, 5, &mut counter);
        regenerate_commitments(&mut block);

        // Exactly one commitment output remains and the merkle root is
        // consistent.
        let count = block.txdata[0]
            .outputs
            .iter()
            .filter(|o| {
                o.script_pubkey.as_bytes().len() >= 38
                    && o.script_pubkey.as_bytes()[2..6] == WITNESS_COMMITMENT_HEADER
            })
            .count();
        assert_eq!(count, 1);
        assert_eq!(block.header.merkle_root, block_merkle_root(&block));
    }
}
