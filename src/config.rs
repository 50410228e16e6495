//! Tunables of the block application core.

use crate::storage::txpool::TXPOOL_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default capacity of the chain event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Default maximum number of transactions accepted in one block.
pub const MAX_TRANSACTIONS_PER_BLOCK: usize = 20_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unable to encode config: {0}")]
    Encode(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Maximum number of unconfirmed transactions held by the pool.
    pub txpool_capacity: usize,
    /// Buffered events per subscriber before the slowest one starts lagging.
    pub event_capacity: usize,
    /// Blocks with more transactions are rejected before any effect runs.
    pub max_block_transactions: usize,
    /// RocksDB directory; the in-memory backend is used when unset.
    pub data_dir: Option<PathBuf>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            txpool_capacity: TXPOOL_CAPACITY,
            event_capacity: EVENT_CHANNEL_CAPACITY,
            max_block_transactions: MAX_TRANSACTIONS_PER_BLOCK,
            data_dir: None,
        }
    }
}

impl ChainConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.txpool_capacity == 0 {
            return Err(ConfigError::Invalid("txpool_capacity must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be positive".into()));
        }
        if self.max_block_transactions == 0 {
            return Err(ConfigError::Invalid(
                "max_block_transactions must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = ChainConfig::from_toml_str("txpool_capacity = 10").unwrap();
        assert_eq!(config.txpool_capacity, 10);
        assert_eq!(config.event_capacity, EVENT_CHANNEL_CAPACITY);
        assert_eq!(config.data_dir, None);
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(matches!(
            ChainConfig::from_toml_str("event_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_malformed_toml() {
        assert!(matches!(
            ChainConfig::from_toml_str("txpool_capacity = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/chain.toml");
        let config = ChainConfig {
            data_dir: Some(PathBuf::from("/var/lib/ledger")),
            ..ChainConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(ChainConfig::load(&path).unwrap(), config);
    }
}
