//! The table storage boundary.
//!
//! A backend stores [`TableEntity`] rows with insert-or-replace semantics and
//! accepts atomic batches of rows sharing one partition key. Size limits are
//! reported as structured errors so the bulk indexer can heal around them.

use async_trait::async_trait;
use thiserror::Error;

use balanceindex_core::error::IndexerError;

use crate::entity::TableEntity;

/// Errors a table backend reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The request as a whole exceeds the backend's limits (HTTP 413 class).
    #[error("Request too large ({size} > {limit})")]
    RequestTooLarge { size: usize, limit: usize },

    /// One operation in the request carries an oversized entity.
    #[error("Entity at operation {index} too large ({size} > {limit} bytes)")]
    EntityTooLarge {
        index: usize,
        size: usize,
        limit: usize,
    },

    /// The backend asked us to slow down.
    #[error("Throttled: {0}")]
    Throttled(String),

    /// The backend could not be reached.
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The backend refused the request.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// The attempt exceeded its deadline.
    #[error("Request timed out after {ms}ms")]
    Timeout { ms: u64 },
}

impl BackendError {
    /// Returns `true` if a later attempt may succeed unchanged.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Throttled(_) | Self::Unavailable(_) | Self::Timeout { .. }
        )
    }
}

impl From<BackendError> for IndexerError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Timeout { ms } => IndexerError::Timeout { ms },
            e if e.is_transient() => IndexerError::TransientBackend(e.to_string()),
            e => IndexerError::PermanentBackend(e.to_string()),
        }
    }
}

/// Size limits a backend enforces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendLimits {
    /// Operations per atomic batch.
    pub max_batch_operations: usize,
    /// Bytes per request.
    pub max_request_bytes: usize,
    /// Bytes per entity.
    pub max_entity_bytes: usize,
}

impl Default for BackendLimits {
    fn default() -> Self {
        Self {
            max_batch_operations: 100,
            max_request_bytes: 4 * 1024 * 1024,
            max_entity_bytes: 1024 * 1024,
        }
    }
}

impl BackendLimits {
    /// Validate one request. Oversized entities are reported before the
    /// request-level limits, with the index of the first offender.
    pub fn check(&self, entities: &[TableEntity]) -> Result<(), BackendError> {
        if let Some((index, e)) = entities
            .iter()
            .enumerate()
            .find(|(_, e)| e.size() > self.max_entity_bytes)
        {
            return Err(BackendError::EntityTooLarge {
                index,
                size: e.size(),
                limit: self.max_entity_bytes,
            });
        }
        if entities.len() > self.max_batch_operations {
            return Err(BackendError::RequestTooLarge {
                size: entities.len(),
                limit: self.max_batch_operations,
            });
        }
        let size: usize = entities.iter().map(TableEntity::size).sum();
        if size > self.max_request_bytes {
            return Err(BackendError::RequestTooLarge {
                size,
                limit: self.max_request_bytes,
            });
        }
        Ok(())
    }
}

/// Reject batches that span partitions.
pub fn check_single_partition(entities: &[TableEntity]) -> Result<(), BackendError> {
    match entities.split_first() {
        Some((first, rest)) => match rest.iter().find(|e| e.partition_key != first.partition_key) {
            Some(other) => Err(BackendError::Rejected(format!(
                "batch spans partitions '{}' and '{}'",
                first.partition_key, other.partition_key
            ))),
            None => Ok(()),
        },
        None => Ok(()),
    }
}

/// A keyed table with atomic per-partition batches.
#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Table name, for logs.
    fn name(&self) -> &str;

    /// Create the table if it does not exist.
    async fn ensure_table(&self) -> Result<(), BackendError>;

    /// Insert or replace a single row.
    async fn insert_or_replace(&self, entity: &TableEntity) -> Result<(), BackendError>;

    /// Insert or replace all rows atomically. Rows must share a partition key.
    async fn execute_batch(&self, entities: &[TableEntity]) -> Result<(), BackendError>;

    /// Every row in a partition.
    async fn query_partition(&self, partition_key: &str) -> Result<Vec<TableEntity>, BackendError>;

    /// Delete a row. Deleting a missing row succeeds.
    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(pk: &str, rk: &str, payload_len: usize) -> TableEntity {
        TableEntity::new(pk, rk, "x".repeat(payload_len))
    }

    #[test]
    fn entity_limit_reports_index() {
        let limits = BackendLimits {
            max_batch_operations: 100,
            max_request_bytes: 10_000,
            max_entity_bytes: 100,
        };
        let batch = vec![entity("p", "a", 10), entity("p", "b", 500), entity("p", "c", 10)];
        assert_eq!(
            limits.check(&batch),
            Err(BackendError::EntityTooLarge {
                index: 1,
                size: 502,
                limit: 100
            })
        );
    }

    #[test]
    fn request_limits() {
        let limits = BackendLimits {
            max_batch_operations: 2,
            max_request_bytes: 50,
            max_entity_bytes: 40,
        };
        let three: Vec<_> = (0..3).map(|i| entity("p", &i.to_string(), 1)).collect();
        assert!(matches!(limits.check(&three), Err(BackendError::RequestTooLarge { size: 3, .. })));

        let heavy = vec![entity("p", "a", 30), entity("p", "b", 30)];
        assert!(matches!(limits.check(&heavy), Err(BackendError::RequestTooLarge { .. })));
        assert!(limits.check(&heavy[..1]).is_ok());
    }

    #[test]
    fn mixed_partitions_rejected() {
        let batch = vec![entity("a", "1", 1), entity("b", "2", 1)];
        assert!(matches!(check_single_partition(&batch), Err(BackendError::Rejected(_))));
        assert!(check_single_partition(&batch[..1]).is_ok());
        assert!(check_single_partition(&[]).is_ok());
    }

    #[test]
    fn conversion_to_indexer_error() {
        let e: IndexerError = BackendError::Timeout { ms: 5 }.into();
        assert!(matches!(e, IndexerError::Timeout { ms: 5 }));
        let e: IndexerError = BackendError::Throttled("503".into()).into();
        assert!(e.is_transient());
        let e: IndexerError = BackendError::Rejected("bad key".into()).into();
        assert!(matches!(e, IndexerError::PermanentBackend(_)));
    }
}
