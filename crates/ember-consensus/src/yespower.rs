//! Height-activated memory-hard header hash.
//!
//! Two parameter sets exist: the default `(N=2048, r=8)` used below the
//! activation height and the active `(N=1024, r=8)` used from height 1.
//! The input is always the 80 serialised header bytes. The password-hashing
//! core is scrypt; each mining worker keeps one `YespowerContext` for its
//! lifetime so parameter setup is paid once per thread.

use ember_primitives::block::HEADER_SIZE;
use ember_primitives::Hash256;
use scrypt::Params;

/// Memory-hard hash parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct YespowerParams {
    pub n: u32,
    pub r: u32,
}

/// Pre-fork parameter set (genesis era).
pub const YESPOWER_DEFAULT: YespowerParams = YespowerParams { n: 2048, r: 8 };

/// Active parameter set from height 1.
pub const YESPOWER_ACTIVE: YespowerParams = YespowerParams { n: 1024, r: 8 };

/// Select the parameter set for a block height.
pub fn params_for_height(height: i64) -> YespowerParams {
    if height >= 1 {
        YESPOWER_ACTIVE
    } else {
        YESPOWER_DEFAULT
    }
}

/// A per-thread hashing context.
///
/// Holds the resolved scrypt parameters for both regimes; workers create
/// one of these before entering the nonce loop.
pub struct YespowerContext {
    default_params: Params,
    active_params: Params,
}

impl YespowerContext {
    pub fn new() -> Self {
        YespowerContext {
            default_params: scrypt_params(YESPOWER_DEFAULT),
            active_params: scrypt_params(YESPOWER_ACTIVE),
        }
    }

    /// Hash an 80-byte serialised header under the height-selected regime.
    pub fn hash(&self, header_bytes: &[u8; HEADER_SIZE], height: i64) -> Hash256 {
        let params = if height >= 1 {
            &self.active_params
        } else {
            &self.default_params
        };
        let mut out = [0u8; 32];
        scrypt::scrypt(header_bytes, header_bytes, params, &mut out)
            .expect("output length is fixed and valid");
        Hash256::from_bytes(out)
    }
}

impl Default for YespowerContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One-shot hash for verification paths without a long-lived context.
pub fn yespower_hash(header_bytes: &[u8; HEADER_SIZE], height: i64) -> Hash256 {
    let params = scrypt_params(params_for_height(height));
    let mut out = [0u8; 32];
    scrypt::scrypt(header_bytes, header_bytes, &params, &mut out)
        .expect("output length is fixed and valid");
    Hash256::from_bytes(out)
}

fn scrypt_params(p: YespowerParams) -> Params {
    let log_n = p.n.trailing_zeros() as u8;
    debug_assert_eq!(1u32 << log_n, p.n, "N must be a power of two");
    Params::new(log_n, p.r, 1, 32).expect("static parameters are valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> [u8; HEADER_SIZE] {
        let mut h = [0u8; HEADER_SIZE];
        for (i, b) in h.iter_mut().enumerate() {
            *b = i as u8;
        }
        h
    }

    #[test]
    fn param_selection_by_height() {
        assert_eq!(params_for_height(0), YESPOWER_DEFAULT);
        assert_eq!(params_for_height(1), YESPOWER_ACTIVE);
        assert_eq!(params_for_height(1_000_000), YESPOWER_ACTIVE);
    }

    #[test]
    fn deterministic_and_height_sensitive() {
        let ctx = YespowerContext::new();
        let h = header();
        let a = ctx.hash(&h, 5);
        let b = ctx.hash(&h, 9);
        assert_eq!(a, b, "same regime, same input, same hash");
        let genesis = ctx.hash(&h, 0);
        assert_ne!(a, genesis, "regimes use different parameters");
    }

    #[test]
    fn context_matches_one_shot() {
        let ctx = YespowerContext::new();
        let h = header();
        assert_eq!(ctx.hash(&h, 3), yespower_hash(&h, 3));
        assert_eq!(ctx.hash(&h, 0), yespower_hash(&h, 0));
    }

    #[test]
    fn input_sensitivity() {
        let ctx = YespowerContext::new();
        let mut h = header();
        let a = ctx.hash(&h, 2);
        h[79] ^= 1; // flip one nonce bit
        let b = ctx.hash(&h, 2);
        assert_ne!(a, b);
    }
}
