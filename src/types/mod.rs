//! Core type definitions shared across the ledger.
//!
//! - `Hash`: 32-byte SHA3-256 ids for blocks and transactions
//! - `Address`: 20-byte account addresses
//! - `encoding`: domain-to-storage conversions and their typed errors

pub mod address;
pub mod encoding;
pub mod hash;
