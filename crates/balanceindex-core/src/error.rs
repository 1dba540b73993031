//! Error types for the balanceindex pipeline.

use thiserror::Error;

/// Errors that can occur while indexing or reconciling balance changes.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Batch for partition '{partition_key}' too large ({size} operations)")]
    OversizedBatch { partition_key: String, size: usize },

    #[error("Entity '{partition_key}/{row_key}' too large")]
    OversizedRecord {
        partition_key: String,
        row_key: String,
    },

    #[error("Transient backend error: {0}")]
    TransientBackend(String),

    #[error("Permanent backend error: {0}")]
    PermanentBackend(String),

    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` for the size-limit classes the bulk indexer heals locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::OversizedBatch { .. } | Self::OversizedRecord { .. })
    }

    /// Returns `true` if re-running the operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientBackend(_) | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for IndexerError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_classes_are_recoverable() {
        let batch = IndexerError::OversizedBatch {
            partition_key: "addr".into(),
            size: 100,
        };
        assert!(batch.is_recoverable());
        assert!(!batch.is_transient());
        assert!(!IndexerError::PermanentBackend("boom".into()).is_recoverable());
    }

    #[test]
    fn timeout_is_transient() {
        assert!(IndexerError::Timeout { ms: 30_000 }.is_transient());
        assert!(IndexerError::TransientBackend("503".into()).is_transient());
        assert!(!IndexerError::InvalidArgument("chain".into()).is_transient());
    }
}
