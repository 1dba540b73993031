//! SQLite table backend.
//!
//! One SQLite table per logical table, keyed by `(partition_key, row_key)`.
//! Batches run in a transaction. The service-side size limits of a hosted
//! table store are enforced client-side with [`BackendLimits`], so behavior
//! matches the in-memory backend.
//!
//! # Usage
//! ```rust,no_run
//! use balanceindex_storage::sqlite::SqliteTable;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let table = SqliteTable::open("./balanceindex.db", "balances").await?;
//!
//! // In-memory (tests / ephemeral)
//! let table = SqliteTable::in_memory("balances").await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use balanceindex_core::error::IndexerError;

use crate::backend::{check_single_partition, BackendError, BackendLimits, TableBackend};
use crate::entity::TableEntity;

/// SQLite-backed table.
pub struct SqliteTable {
    pool: SqlitePool,
    table: String,
    limits: BackendLimits,
}

impl SqliteTable {
    /// Open (or create) a SQLite database at `path` and use `table` in it.
    ///
    /// The path may be a plain file path (`"./index.db"`) or a full
    /// SQLite URL (`"sqlite:./index.db?mode=rwc"`).
    pub async fn open(path: &str, table: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::PermanentBackend(e.to_string()))?;

        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await
            .map_err(|e| IndexerError::PermanentBackend(e.to_string()))?;

        Self::with_pool(pool, table)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory(table: &str) -> Result<Self, IndexerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexerError::PermanentBackend(e.to_string()))?;
        Self::with_pool(pool, table)
    }

    fn with_pool(pool: SqlitePool, table: &str) -> Result<Self, IndexerError> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(IndexerError::Config(format!("invalid table name '{table}'")));
        }
        Ok(Self {
            pool,
            table: table.to_string(),
            limits: BackendLimits::default(),
        })
    }

    /// Override the enforced size limits.
    pub fn with_limits(mut self, limits: BackendLimits) -> Self {
        self.limits = limits;
        self
    }

    fn upsert_sql(&self) -> String {
        format!(
            "INSERT OR REPLACE INTO {} (partition_key, row_key, payload, updated_at)
             VALUES (?, ?, ?, ?)",
            self.table
        )
    }
}

fn backend_err(e: sqlx::Error) -> BackendError {
    match e {
        sqlx::Error::PoolTimedOut => BackendError::Throttled(e.to_string()),
        sqlx::Error::Io(_) | sqlx::Error::PoolClosed | sqlx::Error::WorkerCrashed => {
            BackendError::Unavailable(e.to_string())
        }
        other => BackendError::Rejected(other.to_string()),
    }
}

#[async_trait]
impl TableBackend for SqliteTable {
    fn name(&self) -> &str {
        &self.table
    }

    async fn ensure_table(&self) -> Result<(), BackendError> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (
                partition_key TEXT    NOT NULL,
                row_key       TEXT    NOT NULL,
                payload       TEXT    NOT NULL,
                updated_at    INTEGER NOT NULL,
                PRIMARY KEY (partition_key, row_key)
            );",
            self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn insert_or_replace(&self, entity: &TableEntity) -> Result<(), BackendError> {
        self.limits.check(std::slice::from_ref(entity))?;
        sqlx::query(&self.upsert_sql())
            .bind(&entity.partition_key)
            .bind(&entity.row_key)
            .bind(&entity.payload)
            .bind(chrono::Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn execute_batch(&self, entities: &[TableEntity]) -> Result<(), BackendError> {
        check_single_partition(entities)?;
        self.limits.check(entities)?;

        let sql = self.upsert_sql();
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        for entity in entities {
            sqlx::query(&sql)
                .bind(&entity.partition_key)
                .bind(&entity.row_key)
                .bind(&entity.payload)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(backend_err)?;
        }
        tx.commit().await.map_err(backend_err)?;

        debug!(table = %self.table, rows = entities.len(), "batch committed");
        Ok(())
    }

    async fn query_partition(&self, partition_key: &str) -> Result<Vec<TableEntity>, BackendError> {
        let rows = sqlx::query(&format!(
            "SELECT partition_key, row_key, payload FROM {}
             WHERE partition_key = ? ORDER BY row_key",
            self.table
        ))
        .bind(partition_key)
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        Ok(rows
            .into_iter()
            .map(|row| TableEntity {
                partition_key: row.get("partition_key"),
                row_key: row.get("row_key"),
                payload: row.get("payload"),
            })
            .collect())
    }

    async fn delete(&self, partition_key: &str, row_key: &str) -> Result<(), BackendError> {
        sqlx::query(&format!(
            "DELETE FROM {} WHERE partition_key = ? AND row_key = ?",
            self.table
        ))
        .bind(partition_key)
        .bind(row_key)
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
