//! Block ledger library.
//!
//! Applies blocks to an account ledger atomically while keeping the
//! speculative state of a transaction pool consistent with it.

pub mod config;
pub mod core;
pub mod crypto;
pub mod storage;
pub mod types;
pub mod utils;
