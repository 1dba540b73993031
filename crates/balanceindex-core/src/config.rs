//! Indexer configuration.
//!
//! # Example
//!
//! ```rust
//! use balanceindex_core::config::IndexerBuilder;
//!
//! let config = IndexerBuilder::new()
//!     .storage_path("./balances.db")
//!     .partition_size(50)
//!     .task_count(8)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.partition_size, 50);
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::IndexerError;

/// Largest atomic batch the table backend accepts.
pub const MAX_PARTITION_SIZE: usize = 100;

/// Configuration for an indexer instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Path of the table store (SQLite file).
    pub storage_path: String,
    /// Table holding balance-change rows.
    pub table: String,
    /// Directory containing raw `blk*.dat` files.
    pub block_directory: String,
    /// Maximum operations per atomic batch.
    pub partition_size: usize,
    /// Per-attempt timeout for one backend write (milliseconds).
    pub request_timeout_ms: u64,
    /// Maximum concurrent write tasks. `None` = one task per sub-batch.
    pub task_count: Option<usize>,
    /// First block file to process.
    pub from_blk: u32,
    /// Number of block files to process. `None` = all.
    pub blk_count: Option<u32>,
    /// Plan writes without touching storage.
    pub no_save: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            storage_path: "./balanceindex.db".into(),
            table: "balances".into(),
            block_directory: "./blocks".into(),
            partition_size: MAX_PARTITION_SIZE,
            request_timeout_ms: 30_000,
            task_count: None,
            from_blk: 0,
            blk_count: None,
            no_save: false,
        }
    }
}

impl IndexerConfig {
    /// Per-attempt write timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Reject values the bulk indexer cannot work with.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.partition_size == 0 || self.partition_size > MAX_PARTITION_SIZE {
            return Err(IndexerError::Config(format!(
                "partition_size must be in 1..={MAX_PARTITION_SIZE}, got {}",
                self.partition_size
            )));
        }
        if self.request_timeout_ms == 0 {
            return Err(IndexerError::Config("request_timeout_ms must be > 0".into()));
        }
        if self.task_count == Some(0) {
            return Err(IndexerError::Config("task_count must be > 0".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`IndexerConfig`].
#[derive(Default)]
pub struct IndexerBuilder {
    config: IndexerConfig,
}

impl IndexerBuilder {
    pub fn new() -> Self {
        Self {
            config: IndexerConfig::default(),
        }
    }

    /// Set the table store path.
    pub fn storage_path(mut self, path: impl Into<String>) -> Self {
        self.config.storage_path = path.into();
        self
    }

    /// Set the table name.
    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.config.table = table.into();
        self
    }

    /// Set the raw block directory.
    pub fn block_directory(mut self, dir: impl Into<String>) -> Self {
        self.config.block_directory = dir.into();
        self
    }

    /// Set the maximum operations per batch.
    pub fn partition_size(mut self, size: usize) -> Self {
        self.config.partition_size = size;
        self
    }

    /// Set the per-attempt write timeout in milliseconds.
    pub fn request_timeout_ms(mut self, ms: u64) -> Self {
        self.config.request_timeout_ms = ms;
        self
    }

    /// Bound the number of concurrent write tasks.
    pub fn task_count(mut self, n: usize) -> Self {
        self.config.task_count = Some(n);
        self
    }

    /// Plan writes without saving.
    pub fn no_save(mut self, no_save: bool) -> Self {
        self.config.no_save = no_save;
        self
    }

    /// Validate and build the config.
    pub fn build(self) -> Result<IndexerConfig, IndexerError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
