//! The `--config` file: indexer settings plus logging.
//!
//! ```json
//! {
//!   "storage_path": "./balanceindex.db",
//!   "table": "balances",
//!   "block_directory": "/data/bitcoin/blocks",
//!   "task_count": 8,
//!   "log": { "level": "info", "json": false }
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use balanceindex_core::config::IndexerConfig;

use crate::logging::LogConfig;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    #[serde(flatten)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl CliConfig {
    /// Load from `path`, or defaults when no file is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parse config file '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: CliConfig =
            serde_json::from_str(r#"{"table": "mainnet", "log": {"level": "debug"}}"#).unwrap();
        assert_eq!(config.indexer.table, "mainnet");
        assert_eq!(config.indexer.partition_size, 100);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn missing_path_is_default() {
        let config = CliConfig::load(None).unwrap();
        assert_eq!(config.indexer.table, "balances");
    }
}
