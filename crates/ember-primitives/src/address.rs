//! Address destinations.
//!
//! Two standard destination kinds are supported: legacy base58check
//! pay-to-pubkey-hash and bech32 version-0 pay-to-witness-pubkey-hash.
//! Network parameters (version byte, human-readable part) are passed in by
//! the caller; this crate stays network-agnostic.

use crate::hash::{hash160, Hash160};
use crate::script::Script;
use bech32::{FromBase32, ToBase32, Variant};
use thiserror::Error;

/// Address decoding errors.
#[derive(Error, Debug)]
pub enum AddressError {
    #[error("not a valid address: {0}")]
    Invalid(String),

    #[error("wrong network prefix")]
    WrongNetwork,

    #[error("unsupported witness version {0}")]
    UnsupportedWitnessVersion(u8),
}

/// A payment destination.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Destination {
    /// Legacy pay-to-pubkey-hash.
    PubkeyHash(Hash160),
    /// Version-0 pay-to-witness-pubkey-hash.
    WitnessKeyHash(Hash160),
}

impl Destination {
    /// Derive the legacy destination for a serialised public key.
    pub fn p2pkh_for_pubkey(pubkey: &[u8]) -> Destination {
        Destination::PubkeyHash(hash160(pubkey))
    }

    /// Derive the witness destination for a serialised public key.
    pub fn p2wpkh_for_pubkey(pubkey: &[u8]) -> Destination {
        Destination::WitnessKeyHash(hash160(pubkey))
    }

    /// Parse an address string against the given network parameters.
    pub fn decode(
        address: &str,
        bech32_hrp: &str,
        base58_prefix: u8,
    ) -> Result<Destination, AddressError> {
        if let Ok((hrp, data, variant)) = bech32::decode(address) {
            if hrp != bech32_hrp {
                return Err(AddressError::WrongNetwork);
            }
            if variant != Variant::Bech32 || data.is_empty() {
                return Err(AddressError::Invalid(address.to_string()));
            }
            let version = data[0].to_u8();
            if version != 0 {
                return Err(AddressError::UnsupportedWitnessVersion(version));
            }
            let program = Vec::<u8>::from_base32(&data[1..])
                .map_err(|_| AddressError::Invalid(address.to_string()))?;
            if program.len() != 20 {
                return Err(AddressError::Invalid(address.to_string()));
            }
            let mut h = [0u8; 20];
            h.copy_from_slice(&program);
            return Ok(Destination::WitnessKeyHash(Hash160(h)));
        }

        let payload = bs58::decode(address)
            .with_check(None)
            .into_vec()
            .map_err(|_| AddressError::Invalid(address.to_string()))?;
        if payload.len() != 21 {
            return Err(AddressError::Invalid(address.to_string()));
        }
        if payload[0] != base58_prefix {
            return Err(AddressError::WrongNetwork);
        }
        let mut h = [0u8; 20];
        h.copy_from_slice(&payload[1..]);
        Ok(Destination::PubkeyHash(Hash160(h)))
    }

    /// Encode with the given network parameters.
    pub fn encode(&self, bech32_hrp: &str, base58_prefix: u8) -> String {
        match self {
            Destination::PubkeyHash(h) => {
                let mut payload = Vec::with_capacity(21);
                payload.push(base58_prefix);
                payload.extend_from_slice(h.as_bytes());
                bs58::encode(payload).with_check().into_string()
            }
            Destination::WitnessKeyHash(h) => {
                let mut data = vec![bech32::u5::try_from_u8(0).expect("0 is a valid u5")];
                data.extend(h.as_bytes().to_base32());
                bech32::encode(bech32_hrp, data, Variant::Bech32)
                    .expect("hrp is static and valid")
            }
        }
    }

    /// The output script paying this destination.
    pub fn script_pubkey(&self) -> Script {
        match self {
            Destination::PubkeyHash(h) => Script::p2pkh(h),
            Destination::WitnessKeyHash(h) => Script::p2wpkh(h),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HRP: &str = "em";
    const PREFIX: u8 = 33;

    #[test]
    fn p2pkh_roundtrip() {
        let dest = Destination::PubkeyHash(Hash160([0x11; 20]));
        let addr = dest.encode(HRP, PREFIX);
        let back = Destination::decode(&addr, HRP, PREFIX).unwrap();
        assert_eq!(back, dest);
    }

    #[test]
    fn p2wpkh_roundtrip() {
        let dest = Destination::WitnessKeyHash(Hash160([0x22; 20]));
        let addr = dest.encode(HRP, PREFIX);
        assert!(addr.starts_with("em1"));
        let back = Destination::decode(&addr, HRP, PREFIX).unwrap();
        assert_eq!(back, dest);
    }

    #[test]
    fn wrong_network_rejected() {
        let dest = Destination::WitnessKeyHash(Hash160([0x22; 20]));
        let addr = dest.encode("tm", PREFIX);
        assert!(matches!(
            Destination::decode(&addr, HRP, PREFIX),
            Err(AddressError::WrongNetwork)
        ));
    }

    #[test]
    fn garbage_rejected() {
        assert!(Destination::decode("not an address", HRP, PREFIX).is_err());
        assert!(Destination::decode("", HRP, PREFIX).is_err());
    }

    #[test]
    fn scripts_have_standard_shapes() {
        let legacy = Destination::PubkeyHash(Hash160([3; 20])).script_pubkey();
        assert_eq!(legacy.len(), 25);
        let witness = Destination::WitnessKeyHash(Hash160([3; 20])).script_pubkey();
        assert_eq!(witness.len(), 22);
    }
}
