//! Balance-change rows: how records are laid out in a table, and how they are
//! read back for reconciliation.
//!
//! Partition key = balance id, row key = `{txid}-{block|unconfirmed}`.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use balanceindex_core::error::IndexerError;
use balanceindex_core::ledger::Ledger;
use balanceindex_core::source::BalanceChangeSource;
use balanceindex_core::types::BalanceChangeRecord;

use crate::backend::TableBackend;
use crate::entity::{IntoTableEntity, TableEntity};

impl IntoTableEntity for BalanceChangeRecord {
    fn to_table_entity(&self) -> Result<TableEntity, IndexerError> {
        TableEntity::from_json(&self.balance_id, self.row_key(), self)
    }
}

/// Reads balance changes from a table and removes rows a ledger marks prunable.
pub struct TableBalanceSource {
    backend: Arc<dyn TableBackend>,
}

impl TableBalanceSource {
    pub fn new(backend: Arc<dyn TableBackend>) -> Self {
        Self { backend }
    }

    /// Delete the ledger's prunable rows. Returns how many were deleted.
    pub async fn prune(&self, ledger: &Ledger) -> Result<usize, IndexerError> {
        let mut deleted = 0;
        for record in ledger.prunable() {
            self.backend
                .delete(&record.balance_id, &record.row_key())
                .await?;
            deleted += 1;
        }
        if deleted > 0 {
            info!(table = self.backend.name(), deleted, "Pruned stale balance changes");
        }
        Ok(deleted)
    }
}

#[async_trait]
impl BalanceChangeSource for TableBalanceSource {
    async fn balance_changes(
        &self,
        balance_id: &str,
    ) -> Result<Vec<BalanceChangeRecord>, IndexerError> {
        let rows = self.backend.query_partition(balance_id).await?;
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            match row.parse::<BalanceChangeRecord>() {
                Ok(record) => records.push(record),
                Err(e) => warn!(key = %row.key(), error = %e, "Skipping unreadable balance row"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bulk::BulkIndexer;
    use crate::memory::InMemoryTable;
    use balanceindex_core::config::IndexerConfig;
    use balanceindex_core::source::fetch_ledger;
    use balanceindex_core::types::Outpoint;
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn rec(txid: &str, seen: i64) -> BalanceChangeRecord {
        BalanceChangeRecord::unconfirmed("alice", txid, Utc.timestamp_opt(seen, 0).unwrap())
    }

    #[test]
    fn record_maps_to_keyed_row() {
        let r = rec("tx1", 0).in_block("b7");
        let e = r.to_table_entity().unwrap();
        assert_eq!(e.partition_key, "alice");
        assert_eq!(e.row_key, "tx1-b7");
        assert_eq!(e.parse::<BalanceChangeRecord>().unwrap(), r);
    }

    #[tokio::test]
    async fn index_reconcile_and_prune() {
        let table = Arc::new(InMemoryTable::new("balances"));
        let indexer = BulkIndexer::<BalanceChangeRecord>::new(table.clone(), &IndexerConfig::default());

        let records = vec![
            rec("A", 1).spending(Outpoint::new("P", 0)),
            rec("B", 2).spending(Outpoint::new("P", 0)),
            rec("C", 3).in_block("orphan"),
            rec("D", 4).in_block("b1"),
        ];
        assert_eq!(indexer.index(&records).await.unwrap(), 4);
        table
            .insert_or_replace(&TableEntity::new("alice", "junk", "not a record"))
            .await
            .unwrap();

        let source = TableBalanceSource::new(table.clone());
        let chain: HashMap<String, u64> = [("b1".to_string(), 1)].into_iter().collect();
        let ledger = fetch_ledger(&source, &chain, "alice").await.unwrap();

        assert!(ledger.contains("B"));
        assert!(ledger.contains("D"));
        assert_eq!(ledger.replaced()[0].transaction_id, "A");
        assert_eq!(ledger.prunable()[0].transaction_id, "C");

        assert_eq!(source.prune(&ledger).await.unwrap(), 1);
        assert!(table.get("alice", "C-orphan").is_none());
        // idempotent
        assert_eq!(source.prune(&ledger).await.unwrap(), 1);
        assert_eq!(table.len(), 4);
    }
}
