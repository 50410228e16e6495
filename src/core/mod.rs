//! Ledger data structures and the block application pipeline.
//!
//! - `Account`: confirmed account state
//! - `Transaction` and `Block`: immutable inputs, ids derived from content
//! - `handlers`: per-kind effects, dispatched by an exhaustive match
//! - `overlay`: speculative deltas of pool transactions
//! - `Blockchain`: the five-step block application and its rollback

pub mod account;
pub mod block;
pub mod blockchain;
pub mod handlers;
pub mod ledger;
pub mod overlay;
pub mod transaction;
