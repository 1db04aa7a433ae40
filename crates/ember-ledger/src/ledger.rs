//! The token ledger.
//!
//! All maps live behind one lock. `replay_operation` is the canonical
//! state-transition function driven by confirmed blocks; `apply_operation`
//! wraps it for wallet-initiated operations, adding the governance fee and
//! the optional on-chain record and peer broadcast.

use crate::error::{LedgerError, LedgerResult};
use crate::operation::{decode_token_script, operation_hash, token_message, TokenOp, TokenOperation};
use crate::signature::verify_message;
use crate::store::{LedgerSnapshot, LedgerStore};
use crate::{
    BlockSource, WalletBridge, TOKEN_CREATE_FEE_PER_VBYTE, TOKEN_DEFAULT_FEE_PER_VBYTE,
    TOKEN_MIN_GOV_FEE, TOKEN_RECORD_DUST,
};
use ember_consensus::ChainParams;
use ember_primitives::serialize::{serialize, Decodable, DecodeError, Encodable};
use ember_primitives::{Amount, Block, Hash256, Script};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::io::{self, Read, Write};
use tracing::{debug, info, warn};

/// Registered metadata of one token.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenMeta {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub operator_wallet: String,
    pub creation_height: i64,
}

impl Encodable for TokenMeta {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.name.encode(w)?;
        self.symbol.encode(w)?;
        self.decimals.encode(w)?;
        self.operator_wallet.encode(w)?;
        self.creation_height.encode(w)
    }
}

impl Decodable for TokenMeta {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(TokenMeta {
            name: String::decode(r)?,
            symbol: String::decode(r)?,
            decimals: u8::decode(r)?,
            operator_wallet: String::decode(r)?,
            creation_height: i64::decode(r)?,
        })
    }
}

/// Cached signer addresses for one wallet.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WalletSigners {
    pub legacy: String,
    pub witness: String,
}

impl Encodable for WalletSigners {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.legacy.encode(w)?;
        self.witness.encode(w)
    }
}

impl Decodable for WalletSigners {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(WalletSigners {
            legacy: String::decode(r)?,
            witness: String::decode(r)?,
        })
    }
}

/// Allowance key: (owner, spender, token).
pub type AllowanceKey = (String, String, String);

#[derive(Default)]
struct LedgerInner {
    balances: BTreeMap<(String, String), Amount>,
    allowances: BTreeMap<AllowanceKey, Amount>,
    total_supply: BTreeMap<String, Amount>,
    token_meta: BTreeMap<String, TokenMeta>,
    history: BTreeMap<String, Vec<TokenOperation>>,
    seen_ops: HashSet<Hash256>,
    governance_fees: Amount,
    fee_per_vbyte: Amount,
    create_fee_per_vbyte: Amount,
    wallet_signers: BTreeMap<String, WalletSigners>,
    tip_height: i64,
}

impl LedgerInner {
    fn fresh(params: &ChainParams) -> Self {
        LedgerInner {
            fee_per_vbyte: TOKEN_DEFAULT_FEE_PER_VBYTE,
            create_fee_per_vbyte: TOKEN_CREATE_FEE_PER_VBYTE,
            tip_height: params.token_activation_height - 1,
            ..Default::default()
        }
    }
}

/// The token ledger.
pub struct TokenLedger {
    params: ChainParams,
    store: Option<LedgerStore>,
    inner: RwLock<LedgerInner>,
}

impl TokenLedger {
    /// Create a ledger with optional persistence.
    pub fn new(params: ChainParams, store: Option<LedgerStore>) -> Self {
        let inner = LedgerInner::fresh(&params);
        TokenLedger {
            params,
            store,
            inner: RwLock::new(inner),
        }
    }

    /// Load persisted state, upgrading older schemas. A missing snapshot
    /// leaves the fresh state in place.
    pub fn load(&self) -> LedgerResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let Some(snapshot) = store.load(&self.params)? else {
            return Ok(());
        };
        let mut inner = self.inner.write();
        inner.balances = snapshot.balances;
        inner.allowances = snapshot.allowances;
        inner.total_supply = snapshot.total_supply;
        inner.token_meta = snapshot.token_meta;
        inner.history = snapshot.history;
        inner.governance_fees = snapshot.governance_fees;
        inner.fee_per_vbyte = snapshot.fee_per_vbyte;
        inner.create_fee_per_vbyte = snapshot.create_fee_per_vbyte;
        inner.wallet_signers = snapshot.wallet_signers;
        inner.tip_height = snapshot.tip_height;
        if inner.tip_height == 0 {
            inner.tip_height = self.params.token_activation_height - 1;
        }
        info!(tokens = inner.token_meta.len(), tip = inner.tip_height, "token ledger loaded");
        Ok(())
    }

    /// Persist the current state.
    pub fn flush(&self) -> LedgerResult<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let inner = self.inner.read();
        store.flush(&Self::snapshot_of(&inner))
    }

    fn snapshot_of(inner: &LedgerInner) -> LedgerSnapshot {
        LedgerSnapshot {
            balances: inner.balances.clone(),
            allowances: inner.allowances.clone(),
            total_supply: inner.total_supply.clone(),
            token_meta: inner.token_meta.clone(),
            history: inner.history.clone(),
            governance_fees: inner.governance_fees,
            fee_per_vbyte: inner.fee_per_vbyte,
            create_fee_per_vbyte: inner.create_fee_per_vbyte,
            wallet_signers: inner.wallet_signers.clone(),
            tip_height: inner.tip_height,
            version: crate::TOKEN_DB_VERSION,
        }
    }

    /// Verify the operation signature and that the signer is the acting
    /// party (`spender` for TRANSFERFROM, else `from`).
    pub fn verify_signature(&self, op: &TokenOperation) -> LedgerResult<()> {
        verify_message(
            &op.signer,
            &op.signature,
            &token_message(op),
            &self.params.bech32_hrp,
            self.params.base58_pubkey_prefix,
        )?;
        let expected = op.acting_party();
        if op.signer != expected {
            return Err(LedgerError::SignatureInvalid(format!(
                "signer {} does not match acting party {}",
                op.signer, expected
            )));
        }
        Ok(())
    }

    /// Wallet-initiated path: verify, apply, charge the governance fee,
    /// persist and optionally record/broadcast.
    ///
    /// A present `bridge` means broadcasting was requested. The governance
    /// fee payment and the on-chain record additionally need a wallet to
    /// draw from; the peer broadcast does not.
    pub fn apply_operation(
        &self,
        op: &TokenOperation,
        wallet_name: Option<&str>,
        bridge: Option<&dyn WalletBridge>,
    ) -> LedgerResult<()> {
        self.verify_signature(op)?;
        let mut inner = self.inner.write();
        let height = inner.tip_height;
        Self::replay_locked(&mut inner, op, height)?;

        let rate = if op.op == TokenOp::Create {
            inner.create_fee_per_vbyte
        } else {
            inner.fee_per_vbyte
        };
        let fee = (op.vsize() as Amount * rate).max(TOKEN_MIN_GOV_FEE);
        if let (Some(wallet), Some(bridge)) = (wallet_name, bridge) {
            if bridge.send_governance_fee(wallet, &self.params.governance_wallet, fee) {
                inner.governance_fees += fee;
            }
        }
        info!(
            op = op.op as u8,
            token = %op.token,
            from = %op.from,
            to = %op.to,
            amount = op.amount,
            fee,
            "token operation applied"
        );
        let snapshot = Self::snapshot_of(&inner);
        drop(inner);

        if let Some(store) = &self.store {
            store.flush(&snapshot)?;
        }
        if let Some(bridge) = bridge {
            if let Some(wallet) = wallet_name {
                let script = Script::op_return(&serialize(op));
                if !bridge.record_operation(wallet, &script, TOKEN_RECORD_DUST) {
                    warn!(token = %op.token, "failed to record token operation on chain");
                }
            }
            bridge.broadcast(op);
        }
        Ok(())
    }

    /// Canonical block-connected path: no fee, no broadcast.
    pub fn replay_operation(&self, op: &TokenOperation, height: i64) -> LedgerResult<()> {
        self.verify_signature(op)?;
        let mut inner = self.inner.write();
        Self::replay_locked(&mut inner, op, height)
    }

    /// Apply `op` to locked state. The caller has already verified the
    /// signature. On error the state is left untouched.
    fn replay_locked(
        inner: &mut LedgerInner,
        op: &TokenOperation,
        height: i64,
    ) -> LedgerResult<()> {
        let hash = operation_hash(op);
        if !inner.seen_ops.insert(hash) {
            return Err(LedgerError::DuplicateOperation(hash.to_hex()));
        }

        let result = Self::dispatch(inner, op, height);
        match result {
            Ok(()) => {
                inner.history.entry(op.token.clone()).or_default().push(op.clone());
                Ok(())
            }
            Err(e) => {
                // A rejected operation leaves no trace.
                inner.seen_ops.remove(&hash);
                Err(e)
            }
        }
    }

    fn dispatch(inner: &mut LedgerInner, op: &TokenOperation, height: i64) -> LedgerResult<()> {
        match op.op {
            TokenOp::Create => {
                if inner.token_meta.contains_key(&op.token) {
                    return Err(LedgerError::MetadataExists(op.token.clone()));
                }
                debug!(name = %op.name, symbol = %op.symbol, amount = op.amount, "creating token");
                *inner
                    .balances
                    .entry((op.from.clone(), op.token.clone()))
                    .or_default() += op.amount;
                *inner.total_supply.entry(op.token.clone()).or_default() += op.amount;
                inner.token_meta.insert(
                    op.token.clone(),
                    TokenMeta {
                        name: op.name.clone(),
                        symbol: op.symbol.clone(),
                        decimals: op.decimals,
                        operator_wallet: op.from.clone(),
                        creation_height: height,
                    },
                );
                Ok(())
            }
            TokenOp::Transfer => Self::transfer(inner, &op.from, &op.to, &op.token, op.amount),
            TokenOp::Approve => {
                inner
                    .allowances
                    .insert((op.from.clone(), op.to.clone(), op.token.clone()), op.amount);
                Ok(())
            }
            TokenOp::TransferFrom => {
                let key = (op.from.clone(), op.spender.clone(), op.token.clone());
                let allowance = inner.allowances.get(&key).copied().unwrap_or(0);
                if allowance < op.amount {
                    return Err(LedgerError::InsufficientAllowance {
                        spender: op.spender.clone(),
                        token: op.token.clone(),
                    });
                }
                Self::transfer(inner, &op.from, &op.to, &op.token, op.amount)?;
                *inner.allowances.get_mut(&key).expect("checked above") -= op.amount;
                Ok(())
            }
            TokenOp::IncreaseAllowance => {
                *inner
                    .allowances
                    .entry((op.from.clone(), op.to.clone(), op.token.clone()))
                    .or_default() += op.amount;
                Ok(())
            }
            TokenOp::DecreaseAllowance => {
                let key = (op.from.clone(), op.to.clone(), op.token.clone());
                match inner.allowances.get_mut(&key) {
                    Some(value) if *value > op.amount => {
                        *value -= op.amount;
                    }
                    _ => {
                        // Clamps to zero by removing the entry.
                        inner.allowances.remove(&key);
                    }
                }
                Ok(())
            }
            TokenOp::Burn => {
                if !inner.token_meta.contains_key(&op.token) {
                    return Err(LedgerError::UnknownToken(op.token.clone()));
                }
                let key = (op.from.clone(), op.token.clone());
                let balance = inner.balances.get(&key).copied().unwrap_or(0);
                if balance < op.amount {
                    return Err(LedgerError::InsufficientBalance {
                        address: op.from.clone(),
                        token: op.token.clone(),
                    });
                }
                *inner.balances.get_mut(&key).expect("checked above") -= op.amount;
                *inner.total_supply.entry(op.token.clone()).or_default() -= op.amount;
                Ok(())
            }
            TokenOp::Mint => {
                let meta = inner
                    .token_meta
                    .get(&op.token)
                    .ok_or_else(|| LedgerError::UnknownToken(op.token.clone()))?;
                if meta.operator_wallet != op.from {
                    return Err(LedgerError::NotOperator(op.from.clone()));
                }
                *inner
                    .balances
                    .entry((op.from.clone(), op.token.clone()))
                    .or_default() += op.amount;
                *inner.total_supply.entry(op.token.clone()).or_default() += op.amount;
                Ok(())
            }
            TokenOp::TransferOwnership => {
                let meta = inner
                    .token_meta
                    .get_mut(&op.token)
                    .ok_or_else(|| LedgerError::UnknownToken(op.token.clone()))?;
                if meta.operator_wallet != op.from {
                    return Err(LedgerError::NotOperator(op.from.clone()));
                }
                meta.operator_wallet = op.to.clone();
                Ok(())
            }
        }
    }

    fn transfer(
        inner: &mut LedgerInner,
        from: &str,
        to: &str,
        token: &str,
        amount: Amount,
    ) -> LedgerResult<()> {
        let from_key = (from.to_string(), token.to_string());
        let balance = inner.balances.get(&from_key).copied().unwrap_or(0);
        if balance < amount {
            return Err(LedgerError::InsufficientBalance {
                address: from.to_string(),
                token: token.to_string(),
            });
        }
        *inner.balances.get_mut(&from_key).expect("checked above") -= amount;
        *inner
            .balances
            .entry((to.to_string(), token.to_string()))
            .or_default() += amount;
        Ok(())
    }

    /// Replay every decodable token operation a connected block carries.
    pub fn process_block(&self, block: &Block, height: i64) {
        for tx in &block.txdata {
            for out in &tx.outputs {
                if let Some(op) = decode_token_script(&out.script_pubkey) {
                    if let Err(e) = self.replay_operation(&op, height) {
                        debug!(height, error = %e, "token operation rejected during replay");
                    }
                }
            }
        }
        self.inner.write().tip_height = height;
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush token ledger");
        }
    }

    /// Clear all state and replay the chain from `from_height` (clamped to
    /// the activation height) up to the source's tip. Idempotent.
    pub fn rescan_from_height(&self, from_height: i64, source: &dyn BlockSource) -> LedgerResult<()> {
        let start = from_height.max(self.params.token_activation_height);
        {
            let mut inner = self.inner.write();
            let fee = inner.fee_per_vbyte;
            let create_fee = inner.create_fee_per_vbyte;
            let signers = std::mem::take(&mut inner.wallet_signers);
            *inner = LedgerInner::fresh(&self.params);
            inner.fee_per_vbyte = fee;
            inner.create_fee_per_vbyte = create_fee;
            inner.wallet_signers = signers;
        }

        let tip = source.tip_height();
        info!(start, tip, "rescanning token operations");
        for height in start..=tip {
            let Some(block) = source.block_at(height) else {
                continue;
            };
            for tx in &block.txdata {
                for out in &tx.outputs {
                    if let Some(op) = decode_token_script(&out.script_pubkey) {
                        if let Err(e) = self.replay_operation(&op, height) {
                            debug!(height, error = %e, "token operation rejected during rescan");
                        }
                    }
                }
            }
        }
        self.inner.write().tip_height = tip;
        self.flush()
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn balance(&self, wallet: &str, token: &str) -> Amount {
        self.inner
            .read()
            .balances
            .get(&(wallet.to_string(), token.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn allowance(&self, owner: &str, spender: &str, token: &str) -> Amount {
        self.inner
            .read()
            .allowances
            .get(&(owner.to_string(), spender.to_string(), token.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn total_supply(&self, token: &str) -> Amount {
        self.inner
            .read()
            .total_supply
            .get(token)
            .copied()
            .unwrap_or(0)
    }

    pub fn token_meta(&self, token: &str) -> Option<TokenMeta> {
        self.inner.read().token_meta.get(token).cloned()
    }

    pub fn decimals(&self, token: &str) -> u8 {
        self.inner
            .read()
            .token_meta
            .get(token)
            .map(|m| m.decimals)
            .unwrap_or(8)
    }

    pub fn governance_balance(&self) -> Amount {
        self.inner.read().governance_fees
    }

    pub fn fee_rate(&self) -> Amount {
        self.inner.read().fee_per_vbyte
    }

    pub fn set_fee_rate(&self, fee_per_vbyte: Amount) {
        self.inner.write().fee_per_vbyte = fee_per_vbyte;
    }

    pub fn tip_height(&self) -> i64 {
        self.inner.read().tip_height
    }

    /// (token id, name, symbol) for every registered token.
    pub fn list_all_tokens(&self) -> Vec<(String, String, String)> {
        self.inner
            .read()
            .token_meta
            .iter()
            .map(|(id, meta)| (id.clone(), meta.name.clone(), meta.symbol.clone()))
            .collect()
    }

    /// Tokens with a positive balance for `address`.
    pub fn list_wallet_tokens(&self, address: &str) -> Vec<(String, String, String)> {
        let inner = self.inner.read();
        let mut out = Vec::new();
        for ((holder, token), balance) in &inner.balances {
            if holder == address && *balance > 0 {
                let (name, symbol) = inner
                    .token_meta
                    .get(token)
                    .map(|m| (m.name.clone(), m.symbol.clone()))
                    .unwrap_or_default();
                out.push((token.clone(), name, symbol));
            }
        }
        out
    }

    /// Operation history of a token, optionally filtered to operations
    /// touching one address.
    pub fn token_history(&self, token: &str, address_filter: &str) -> Vec<TokenOperation> {
        let inner = self.inner.read();
        let Some(ops) = inner.history.get(token) else {
            return Vec::new();
        };
        ops.iter()
            .filter(|op| {
                address_filter.is_empty()
                    || op.from == address_filter
                    || op.to == address_filter
                    || op.spender == address_filter
            })
            .cloned()
            .collect()
    }

    /// Memo of the history entry matching `hash`, if any.
    pub fn token_tx_memo(&self, token: &str, hash: &Hash256) -> String {
        let inner = self.inner.read();
        inner
            .history
            .get(token)
            .and_then(|ops| ops.iter().find(|op| operation_hash(op) == *hash))
            .map(|op| op.memo.clone())
            .unwrap_or_default()
    }

    /// Cached signer address for a wallet, if one is known.
    pub fn signer_address(&self, wallet: &str, witness: bool) -> Option<String> {
        let inner = self.inner.read();
        let signers = inner.wallet_signers.get(wallet)?;
        let address = if witness { &signers.witness } else { &signers.legacy };
        if address.is_empty() {
            None
        } else {
            Some(address.clone())
        }
    }

    /// Remember a wallet's signer address.
    pub fn set_signer_address(&self, wallet: &str, witness: bool, address: String) {
        {
            let mut inner = self.inner.write();
            let slot = inner.wallet_signers.entry(wallet.to_string()).or_default();
            if witness {
                slot.witness = address;
            } else {
                slot.legacy = address;
            }
        }
        if let Err(e) = self.flush() {
            warn!(error = %e, "failed to flush signer cache");
        }
    }
}
