//! Monetary amounts and fee rates.

/// Amount in base units (satoshi-scale), signed to allow fee deltas.
pub type Amount = i64;

/// Base units per coin.
pub const COIN: Amount = 100_000_000;

/// A fee rate in base units per 1000 virtual bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct FeeRate {
    per_kvb: Amount,
}

impl FeeRate {
    pub fn from_per_kvb(per_kvb: Amount) -> Self {
        FeeRate { per_kvb }
    }

    pub fn per_kvb(&self) -> Amount {
        self.per_kvb
    }

    /// Fee required for `vsize` virtual bytes. Rounds down but never to
    /// zero for a non-zero size at a non-zero rate.
    pub fn fee(&self, vsize: u64) -> Amount {
        let fee = self.per_kvb.saturating_mul(vsize as Amount) / 1000;
        if fee == 0 && vsize != 0 && self.per_kvb != 0 {
            1
        } else {
            fee
        }
    }
}
