//! Resilient bulk indexer — writes keyed rows into a size-limited table.
//!
//! Rows are grouped by partition key and cut into sub-batches of at most
//! `partition_size`. Every sub-batch gets its own task; tasks run
//! concurrently and share nothing but the persisted-entity counter.
//!
//! Each task owns a queue seeded with its sub-batch:
//!
//! ```text
//! Pending ──► Submitted ──► Committed
//!                 ├──────► SplitRetry      (request too large: two halves re-queued)
//!                 ├──────► RecordDropRetry (entity too large: offender dropped, rest re-queued)
//!                 └──────► Failed          (anything else: logged, task stops)
//! ```
//!
//! Writes are insert-or-replace, so re-running after a failure converges.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use balanceindex_core::config::{IndexerConfig, MAX_PARTITION_SIZE};
use balanceindex_core::error::IndexerError;

use crate::backend::{BackendError, TableBackend};
use crate::entity::{IntoTableEntity, TableEntity};

/// Payload bytes shown per entity when a failed batch is logged.
const LOG_PAYLOAD_BYTES: usize = 512;

type Mapper<T> = Arc<dyn Fn(&T) -> Result<TableEntity, IndexerError> + Send + Sync>;

/// Outcome of one `index` run.
#[derive(Debug, Default)]
pub struct IndexReport {
    /// Entities written (or planned, in dry-run mode).
    pub persisted: usize,
    /// Backend writes that committed.
    pub committed_batches: usize,
    /// Times a batch was bisected.
    pub split_retries: usize,
    /// `partition/row` keys dropped as oversized. Never retried.
    pub dropped: Vec<String>,
    /// Terminal failures, one per failed sub-batch.
    pub failures: Vec<IndexerError>,
}

impl IndexReport {
    /// `Ok(persisted)`, or the first terminal failure.
    pub fn into_result(self) -> Result<usize, IndexerError> {
        match self.failures.into_iter().next() {
            Some(err) => Err(err),
            None => Ok(self.persisted),
        }
    }

    fn absorb(&mut self, worker: WorkerReport) {
        self.persisted += worker.persisted;
        self.committed_batches += worker.committed_batches;
        self.split_retries += worker.split_retries;
        self.dropped.extend(worker.dropped);
        self.failures.extend(worker.failure);
    }
}

#[derive(Debug, Default)]
struct WorkerReport {
    persisted: usize,
    committed_batches: usize,
    split_retries: usize,
    dropped: Vec<String>,
    failure: Option<IndexerError>,
}

/// Writes items of type `T` to a table backend.
pub struct BulkIndexer<T> {
    backend: Arc<dyn TableBackend>,
    mapper: Mapper<T>,
    partition_size: usize,
    timeout: Duration,
    permits: Option<Arc<Semaphore>>,
    no_save: bool,
    indexed: Arc<AtomicUsize>,
    committed: AtomicUsize,
    splits: AtomicUsize,
    dropped: AtomicUsize,
}

impl<T: IntoTableEntity + 'static> BulkIndexer<T> {
    /// Indexer using the item's own row mapping.
    pub fn new(backend: Arc<dyn TableBackend>, config: &IndexerConfig) -> Self {
        Self::with_mapper(backend, config, |item: &T| item.to_table_entity())
    }
}

impl<T: 'static> BulkIndexer<T> {
    /// Indexer with a custom row mapping.
    pub fn with_mapper<F>(backend: Arc<dyn TableBackend>, config: &IndexerConfig, mapper: F) -> Self
    where
        F: Fn(&T) -> Result<TableEntity, IndexerError> + Send + Sync + 'static,
    {
        Self {
            backend,
            mapper: Arc::new(mapper),
            partition_size: config.partition_size.clamp(1, MAX_PARTITION_SIZE),
            timeout: config.request_timeout(),
            permits: config.task_count.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            no_save: config.no_save,
            indexed: Arc::new(AtomicUsize::new(0)),
            committed: AtomicUsize::new(0),
            splits: AtomicUsize::new(0),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Entities persisted by this indexer so far, across runs. Still
    /// accurate after a run reports failure.
    pub fn indexed_entities(&self) -> usize {
        self.indexed.load(Ordering::SeqCst)
    }

    /// Backend writes committed so far, across runs.
    pub fn committed_batches(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    /// Batch bisections so far, across runs.
    pub fn split_retries(&self) -> usize {
        self.splits.load(Ordering::SeqCst)
    }

    /// Entities lost to the oversized-record path, across runs. Their keys
    /// are in each run's [`IndexReport::dropped`].
    pub fn dropped_entities(&self) -> usize {
        self.dropped.load(Ordering::SeqCst)
    }

    /// The backend being written to.
    pub fn backend(&self) -> &Arc<dyn TableBackend> {
        &self.backend
    }

    /// Write `items`, returning how many were persisted.
    ///
    /// Fails with the first terminal backend error after every sub-batch
    /// has finished; rows written by other sub-batches stay written.
    pub async fn index<'a, I>(&self, items: I) -> Result<usize, IndexerError>
    where
        I: IntoIterator<Item = &'a T>,
    {
        self.index_report(items).await.into_result()
    }

    /// Write `items` and report everything that happened.
    pub async fn index_report<'a, I>(&self, items: I) -> IndexReport
    where
        I: IntoIterator<Item = &'a T>,
    {
        let mut report = IndexReport::default();

        let mut groups: BTreeMap<String, Vec<TableEntity>> = BTreeMap::new();
        for item in items {
            match (self.mapper)(item) {
                Ok(entity) => groups.entry(entity.partition_key.clone()).or_default().push(entity),
                Err(e) => {
                    error!(error = %e, "Could not map item to a table entity");
                    report.failures.push(e);
                }
            }
        }

        let sub_batches: Vec<(String, Vec<TableEntity>)> = groups
            .into_iter()
            .flat_map(|(pk, entities)| {
                entities
                    .chunks(self.partition_size)
                    .map(|chunk| (pk.clone(), chunk.to_vec()))
                    .collect::<Vec<_>>()
            })
            .collect();

        if self.no_save {
            report.persisted = sub_batches.iter().map(|(_, b)| b.len()).sum();
            info!(
                table = self.backend.name(),
                entities = report.persisted,
                batches = sub_batches.len(),
                "Dry run, nothing written"
            );
            return report;
        }

        if let Err(e) = self.backend.ensure_table().await {
            error!(table = self.backend.name(), error = %e, "Could not set up table");
            report.failures.push(e.into());
            return report;
        }

        let handles: Vec<_> = sub_batches
            .into_iter()
            .map(|(partition_key, batch)| {
                let backend = self.backend.clone();
                let indexed = self.indexed.clone();
                let permits = self.permits.clone();
                let timeout = self.timeout;
                tokio::spawn(async move {
                    let _permit = match permits {
                        Some(sem) => match sem.acquire_owned().await {
                            Ok(permit) => Some(permit),
                            Err(e) => {
                                return WorkerReport {
                                    failure: Some(IndexerError::Other(e.to_string())),
                                    ..Default::default()
                                }
                            }
                        },
                        None => None,
                    };
                    write_sub_batch(backend, partition_key, batch, timeout, indexed).await
                })
            })
            .collect();

        for joined in futures::future::join_all(handles).await {
            match joined {
                Ok(worker) => report.absorb(worker),
                Err(e) => report.failures.push(IndexerError::Other(format!("write task failed: {e}"))),
            }
        }

        self.committed.fetch_add(report.committed_batches, Ordering::SeqCst);
        self.splits.fetch_add(report.split_retries, Ordering::SeqCst);
        self.dropped.fetch_add(report.dropped.len(), Ordering::SeqCst);

        info!(
            table = self.backend.name(),
            persisted = report.persisted,
            batches = report.committed_batches,
            splits = report.split_retries,
            dropped = report.dropped.len(),
            failures = report.failures.len(),
            "Bulk index finished"
        );
        report
    }
}

/// Drive one sub-batch until its queue drains or a terminal error occurs.
async fn write_sub_batch(
    backend: Arc<dyn TableBackend>,
    partition_key: String,
    batch: Vec<TableEntity>,
    timeout: Duration,
    indexed: Arc<AtomicUsize>,
) -> WorkerReport {
    let mut report = WorkerReport::default();
    let mut queue = VecDeque::from([batch]);

    while let Some(mut batch) = queue.pop_front() {
        if batch.is_empty() {
            continue;
        }
        match submit(backend.as_ref(), &batch, timeout).await {
            Ok(()) => {
                indexed.fetch_add(batch.len(), Ordering::SeqCst);
                report.persisted += batch.len();
                report.committed_batches += 1;
                debug!(partition_key = %partition_key, entities = batch.len(), "Batch committed");
            }
            Err(BackendError::RequestTooLarge { size, limit }) if batch.len() > 1 => {
                let second = batch.split_off(batch.len() / 2);
                warn!(
                    partition_key = %partition_key,
                    size,
                    limit,
                    halves = ?(batch.len(), second.len()),
                    "Request too large, splitting batch"
                );
                report.split_retries += 1;
                queue.push_back(batch);
                queue.push_back(second);
            }
            Err(BackendError::EntityTooLarge { index, size, limit }) if index < batch.len() => {
                let dropped = batch.remove(index);
                let loss = IndexerError::OversizedRecord {
                    partition_key: dropped.partition_key.clone(),
                    row_key: dropped.row_key.clone(),
                };
                warn!(
                    partition_key = %dropped.partition_key,
                    row_key = %dropped.row_key,
                    size,
                    limit,
                    error = %loss,
                    "Entity too large, dropped from batch; this row is lost"
                );
                report.dropped.push(dropped.key());
                queue.push_back(batch);
            }
            Err(e) => {
                let err = escalate(e, &partition_key, batch.len());
                let entities: Vec<String> = batch
                    .iter()
                    .map(|e| e.describe(LOG_PAYLOAD_BYTES))
                    .collect();
                error!(
                    partition_key = %partition_key,
                    entities = ?entities,
                    bytes = batch.iter().map(TableEntity::size).sum::<usize>(),
                    error = %err,
                    "Error while importing entities"
                );
                report.failure = Some(err);
                break;
            }
        }
    }
    report
}

/// One write attempt: a single-row write for one entity, a batch otherwise.
async fn submit(
    backend: &dyn TableBackend,
    batch: &[TableEntity],
    timeout: Duration,
) -> Result<(), BackendError> {
    let write = async {
        match batch {
            [single] => backend.insert_or_replace(single).await,
            _ => backend.execute_batch(batch).await,
        }
    };
    match tokio::time::timeout(timeout, write).await {
        Ok(result) => result,
        Err(_) => Err(BackendError::Timeout {
            ms: timeout.as_millis() as u64,
        }),
    }
}

/// Size errors that survive local recovery become permanent.
fn escalate(e: BackendError, partition_key: &str, size: usize) -> IndexerError {
    match e {
        BackendError::RequestTooLarge { .. } => IndexerError::PermanentBackend(
            IndexerError::OversizedBatch {
                partition_key: partition_key.to_string(),
                size,
            }
            .to_string(),
        ),
        BackendError::EntityTooLarge { index, .. } => IndexerError::PermanentBackend(format!(
            "{e}: operation {index} outside batch of {size} for partition '{partition_key}'"
        )),
        other => other.into(),
    }
}
