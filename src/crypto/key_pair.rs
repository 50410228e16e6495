//! Schnorr key pairs on secp256k1 and the raw public-key form kept in accounts.

use crate::types::address::Address;
use crate::types::encoding::{EncodingError, hex_to_array};
use borsh::{BorshDeserialize, BorshSerialize};
use k256::schnorr::{SigningKey, VerifyingKey};
use rand_core::OsRng;
use std::fmt;

/// Private key used by account owners and block producers.
///
/// Generated using cryptographically secure randomness from the OS.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Public key with its derived address.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    pub key: VerifyingKey,
    pub address: Address,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        Self {
            key: SigningKey::random(&mut OsRng),
        }
    }

    /// Derives the corresponding public key.
    pub fn public_key(&self) -> PublicKey {
        let key = *self.key.verifying_key();
        let bytes: [u8; 32] = key.to_bytes().into();
        PublicKey {
            key,
            address: Address::from_public_key(&bytes),
        }
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicKey {
    /// Returns the x-only 32-byte encoding of the key.
    pub fn to_bytes(&self) -> PublicKeyBytes {
        PublicKeyBytes(self.key.to_bytes().into())
    }

    /// Returns the key as lowercase hex, the form carried inside transactions.
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes().0)
    }
}

/// Raw 32-byte public key as stored on an account or in a payload row.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Ord, PartialOrd, BorshSerialize, BorshDeserialize,
)]
pub struct PublicKeyBytes(pub [u8; 32]);

impl PublicKeyBytes {
    /// Parses a hex-encoded x-only secp256k1 key.
    ///
    /// Fails on malformed hex, wrong length, or bytes that are not a point on
    /// the curve.
    pub fn from_hex(field: &'static str, value: &str) -> Result<Self, EncodingError> {
        let bytes: [u8; 32] = hex_to_array(field, value)?;
        VerifyingKey::from_bytes(&bytes).map_err(|e| EncodingError::InvalidValue {
            field,
            reason: e.to_string(),
        })?;
        Ok(Self(bytes))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for PublicKeyBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_matches_key_bytes() {
        let key = PrivateKey::new().public_key();
        assert_eq!(key.address, Address::from_public_key(&key.to_bytes().0));
    }

    #[test]
    fn hex_roundtrip_through_public_key_bytes() {
        let key = PrivateKey::new().public_key();
        let parsed = PublicKeyBytes::from_hex("publicKey", &key.to_hex()).unwrap();
        assert_eq!(parsed, key.to_bytes());
        assert_eq!(parsed.to_string(), key.to_hex());
    }

    #[test]
    fn rejects_bytes_off_the_curve() {
        // x = p (field modulus) is never a valid x-coordinate
        let modulus = format!("{}fffffffefffffc2f", "f".repeat(48));
        assert!(matches!(
            PublicKeyBytes::from_hex("publicKey", &modulus),
            Err(EncodingError::InvalidValue { .. })
        ));
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(
            PublicKeyBytes::from_hex("publicKey", "abcd"),
            Err(EncodingError::InvalidLength { .. })
        ));
    }
}
