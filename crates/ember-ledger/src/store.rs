//! Ledger persistence.
//!
//! A two-key schema in the `ledger` column family: `'v'` holds the schema
//! version, `'s'` the full state snapshot. Older snapshots are upgraded on
//! load; strictly newer ones are refused.

use crate::error::{LedgerError, LedgerResult};
use crate::ledger::{AllowanceKey, TokenMeta, WalletSigners};
use crate::operation::TokenOperation;
use crate::TOKEN_DB_VERSION;
use ember_consensus::ChainParams;
use ember_primitives::serialize::{deserialize, serialize, Decodable, DecodeError, Encodable};
use ember_primitives::Amount;
use ember_storage::{ColumnFamily, Database, WriteBatch};
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::info;

const VERSION_KEY: &[u8] = b"v";
const STATE_KEY: &[u8] = b"s";

/// The persisted ledger state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub balances: BTreeMap<(String, String), Amount>,
    pub allowances: BTreeMap<AllowanceKey, Amount>,
    pub total_supply: BTreeMap<String, Amount>,
    pub token_meta: BTreeMap<String, TokenMeta>,
    pub history: BTreeMap<String, Vec<TokenOperation>>,
    pub governance_fees: Amount,
    pub fee_per_vbyte: Amount,
    pub create_fee_per_vbyte: Amount,
    pub wallet_signers: BTreeMap<String, WalletSigners>,
    pub tip_height: i64,
    pub version: u32,
}

impl Encodable for LedgerSnapshot {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.balances.encode(w)?;
        self.allowances.encode(w)?;
        self.total_supply.encode(w)?;
        self.token_meta.encode(w)?;
        self.history.encode(w)?;
        self.governance_fees.encode(w)?;
        self.fee_per_vbyte.encode(w)?;
        self.create_fee_per_vbyte.encode(w)?;
        self.wallet_signers.encode(w)?;
        self.tip_height.encode(w)?;
        self.version.encode(w)
    }
}

impl Decodable for LedgerSnapshot {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(LedgerSnapshot {
            balances: BTreeMap::decode(r)?,
            allowances: BTreeMap::decode(r)?,
            total_supply: BTreeMap::decode(r)?,
            token_meta: BTreeMap::decode(r)?,
            history: BTreeMap::decode(r)?,
            governance_fees: Amount::decode(r)?,
            fee_per_vbyte: Amount::decode(r)?,
            create_fee_per_vbyte: Amount::decode(r)?,
            wallet_signers: BTreeMap::decode(r)?,
            tip_height: i64::decode(r)?,
            version: u32::decode(r)?,
        })
    }
}

/// The v2 schema stored each wallet's signer as one bare string.
#[derive(Debug, Clone, Default)]
struct LedgerSnapshotV2 {
    balances: BTreeMap<(String, String), Amount>,
    allowances: BTreeMap<AllowanceKey, Amount>,
    total_supply: BTreeMap<String, Amount>,
    token_meta: BTreeMap<String, TokenMeta>,
    history: BTreeMap<String, Vec<TokenOperation>>,
    governance_fees: Amount,
    fee_per_vbyte: Amount,
    create_fee_per_vbyte: Amount,
    wallet_signers: BTreeMap<String, String>,
    tip_height: i64,
}

impl Decodable for LedgerSnapshotV2 {
    fn decode<R: Read>(r: &mut R) -> Result<Self, DecodeError> {
        Ok(LedgerSnapshotV2 {
            balances: BTreeMap::decode(r)?,
            allowances: BTreeMap::decode(r)?,
            total_supply: BTreeMap::decode(r)?,
            token_meta: BTreeMap::decode(r)?,
            history: BTreeMap::decode(r)?,
            governance_fees: Amount::decode(r)?,
            fee_per_vbyte: Amount::decode(r)?,
            create_fee_per_vbyte: Amount::decode(r)?,
            wallet_signers: BTreeMap::decode(r)?,
            tip_height: i64::decode(r)?,
        })
    }
}

#[cfg(test)]
impl Encodable for LedgerSnapshotV2 {
    fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.balances.encode(w)?;
        self.allowances.encode(w)?;
        self.total_supply.encode(w)?;
        self.token_meta.encode(w)?;
        self.history.encode(w)?;
        self.governance_fees.encode(w)?;
        self.fee_per_vbyte.encode(w)?;
        self.create_fee_per_vbyte.encode(w)?;
        self.wallet_signers.encode(w)?;
        self.tip_height.encode(w)
    }
}

/// Keyed store for the ledger snapshot.
pub struct LedgerStore {
    db: Arc<Database>,
}

impl LedgerStore {
    pub fn new(db: Arc<Database>) -> Self {
        LedgerStore { db }
    }

    /// Load the snapshot, upgrading older schemas in place. Returns `None`
    /// for a fresh store.
    pub fn load(&self, params: &ChainParams) -> LedgerResult<Option<LedgerSnapshot>> {
        let version = match self.db.get(ColumnFamily::Ledger, VERSION_KEY)? {
            Some(bytes) => deserialize::<u32>(&bytes)?,
            None => return Ok(None),
        };
        if version > TOKEN_DB_VERSION {
            return Err(LedgerError::SchemaTooNew {
                found: version,
                supported: TOKEN_DB_VERSION,
            });
        }

        let Some(state_bytes) = self.db.get(ColumnFamily::Ledger, STATE_KEY)? else {
            return Ok(None);
        };

        let snapshot = if version >= 3 {
            deserialize::<LedgerSnapshot>(&state_bytes)?
        } else {
            let old = deserialize::<LedgerSnapshotV2>(&state_bytes)?;
            info!(from = version, to = TOKEN_DB_VERSION, "upgrading token ledger schema");
            let witness_prefix = format!("{}1", params.bech32_hrp);
            let wallet_signers = old
                .wallet_signers
                .into_iter()
                .map(|(wallet, address)| {
                    let mut signers = WalletSigners::default();
                    if address.starts_with(&witness_prefix) {
                        signers.witness = address;
                    } else {
                        signers.legacy = address;
                    }
                    (wallet, signers)
                })
                .collect();
            LedgerSnapshot {
                balances: old.balances,
                allowances: old.allowances,
                total_supply: old.total_supply,
                token_meta: old.token_meta,
                history: old.history,
                governance_fees: old.governance_fees,
                fee_per_vbyte: old.fee_per_vbyte,
                create_fee_per_vbyte: old.create_fee_per_vbyte,
                wallet_signers,
                tip_height: old.tip_height,
                version: TOKEN_DB_VERSION,
            }
        };

        if version < TOKEN_DB_VERSION {
            self.flush(&snapshot)?;
        }
        Ok(Some(snapshot))
    }

    /// Write the snapshot and version atomically.
    pub fn flush(&self, snapshot: &LedgerSnapshot) -> LedgerResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Ledger, STATE_KEY, &serialize(snapshot));
        batch.put(
            ColumnFamily::Ledger,
            VERSION_KEY,
            &serialize(&TOKEN_DB_VERSION),
        );
        self.db.write_batch(batch)?;
        Ok(())
    }

    #[cfg(test)]
    fn write_raw(&self, version: u32, state: &[u8]) -> LedgerResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(ColumnFamily::Ledger, STATE_KEY, state);
        batch.put(ColumnFamily::Ledger, VERSION_KEY, &serialize(&version));
        self.db.write_batch(batch)?;
        Ok(())
    }
}
