//! In-memory table backend.
//!
//! Enforces the same size limits as a real table service, so the bulk
//! indexer's recovery paths can be exercised without one. All data is lost
//! when the process exits.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::backend::{check_single_partition, BackendError, BackendLimits, TableBackend};
use crate::entity::TableEntity;

type Rows = BTreeMap<(String, String), TableEntity>;

/// In-memory table.
pub struct InMemoryTable {
    name: String,
    limits: BackendLimits,
    rows: Mutex<Rows>,
    requests: AtomicUsize,
    batches: AtomicUsize,
}

impl InMemoryTable {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_limits(name, BackendLimits::default())
    }

    pub fn with_limits(name: impl Into<String>, limits: BackendLimits) -> Self {
        Self {
            name: name.into(),
            limits,
            rows: Mutex::new(BTreeMap::new()),
            requests: AtomicUsize::new(0),
            batches: AtomicUsize::new(0),
        }
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Returns `true` if no rows are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up one row.
    pub fn get(&self, partition_key: &str, row_key: &str) -> Option<TableEntity> {
        self.rows
            .lock()
            .ok()?
            .get(&(partition_key.to_string(), row_key.to_string()))
            .cloned()
    }

    /// Write requests received, accepted or not.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }

    /// Multi-row batches committed.
    pub fn committed_batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }

    fn rows(&self) -> Result<MutexGuard<'_, Rows>, BackendError> {
        self.rows
            .lock()
            .map_err(|_| BackendError::Unavailable("table lock poisoned".into()))
    }

    fn put(rows: &mut Rows, entity: &TableEntity) {
        rows.insert(
            (entity.partition_key.clone(), entity.row_key.clone()),
            entity.clone(),
        );
    }
}

#[async_trait]
impl TableBackend for InMemoryTable {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ensure_table(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn insert_or_replace(&self, entity: &TableEntity) -> Result<(), BackendError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        self.limits.check(std::slice::from_ref(entity))?;
        Self::put(&mut *self.rows()?, entity);
        Ok(())
    }

    async fn execute_batch(&self, entities: &[TableEntity]) -> Result<(), BackendError> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        check_single_partition(entities)?;
        self.limits.check(entities)?;
        let mut rows = self.rows()?;
        for entity in entities {
            Self::put(&mut rows, entity);
        }
        self.batches.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn query_partition(&self, partition_key: &str) -> Result<Vec<TableEntity>, BackendError> {
        Ok(self
            .rows()?
            .values()
            .filter(|e| e.partition_key == partition_key)
            .cloned()
            .collect())
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), BackendError> {
        self.rows()?
            .remove(&(partition_key.to_string(), row_key.to_string()));
        Ok(())
    }
}
