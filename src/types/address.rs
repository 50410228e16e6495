//! 20-byte account addresses derived from public keys.

use borsh::{BorshDeserialize, BorshSerialize};
use sha3::{Digest, Sha3_256};
use std::fmt;

/// Size in bytes of an [`Address`].
pub const ADDRESS_SIZE: usize = 20;

/// Fixed-size 20-byte address identifying accounts on the ledger.
///
/// Derived from public keys via SHA3-256 hashing, taking the last 20 bytes.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Ord,
    PartialOrd,
    Default,
    BorshSerialize,
    BorshDeserialize,
)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub const fn zero() -> Self {
        Address([0u8; ADDRESS_SIZE])
    }

    /// Derives the address owned by a 32-byte public key.
    ///
    /// Address derivation: SHA3-256(key)[12..32]
    pub fn from_public_key(key: &[u8; 32]) -> Self {
        let full: [u8; 32] = Sha3_256::digest(key).into();
        let mut addr = [0u8; ADDRESS_SIZE];
        addr.copy_from_slice(&full[12..]);
        Address(addr)
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derivation_is_deterministic() {
        let key = [9u8; 32];
        assert_eq!(Address::from_public_key(&key), Address::from_public_key(&key));
        assert_ne!(Address::from_public_key(&key), Address::from_public_key(&[8u8; 32]));
    }

    #[test]
    fn display_prefixes_hex() {
        let s = Address([0xff; ADDRESS_SIZE]).to_string();
        assert_eq!(s.len(), 2 + 2 * ADDRESS_SIZE);
        assert!(s.starts_with("0xffff"));
    }
}
