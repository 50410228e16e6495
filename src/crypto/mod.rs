//! Key material used by accounts and block producers.

pub mod key_pair;
