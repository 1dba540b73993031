//! balanceindex-storage — table backends and the resilient bulk indexer.
//!
//! Backends:
//! - [`memory`] — in-memory (dev/testing, no persistence)
//! - [`sqlite`] — SQLite via `sqlx` (feature `sqlite`)
//!
//! [`bulk::BulkIndexer`] writes any mappable item through a [`TableBackend`],
//! bisecting oversized batches and dropping oversized rows.

pub mod backend;
pub mod balances;
pub mod bulk;
pub mod entity;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use backend::{BackendError, BackendLimits, TableBackend};
pub use balances::TableBalanceSource;
pub use bulk::{BulkIndexer, IndexReport};
pub use entity::{IntoTableEntity, TableEntity};
pub use memory::InMemoryTable;
