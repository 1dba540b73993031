//! Where reconciliation reads balance changes from.

use async_trait::async_trait;

use crate::chain::ChainIndex;
use crate::error::IndexerError;
use crate::ledger::Ledger;
use crate::types::BalanceChangeRecord;

/// Supplies the raw balance changes recorded for one balance.
///
/// Implementations return a consistent snapshot; ordering is not significant.
#[async_trait]
pub trait BalanceChangeSource: Send + Sync {
    async fn balance_changes(&self, balance_id: &str)
        -> Result<Vec<BalanceChangeRecord>, IndexerError>;
}

/// Read a balance from `source` and reconcile it against `chain`.
pub async fn fetch_ledger(
    source: &dyn BalanceChangeSource,
    chain: &dyn ChainIndex,
    balance_id: &str,
) -> Result<Ledger, IndexerError> {
    let records = source.balance_changes(balance_id).await?;
    tracing::debug!(balance_id, records = records.len(), "fetched balance changes");
    Ok(Ledger::new(&records, chain))
}

// ─── In-memory source (for testing) ───────────────────────────────────────────

/// A fixed set of records, filtered by balance id.
#[derive(Default)]
pub struct MemoryBalanceSource {
    records: Vec<BalanceChangeRecord>,
}

impl MemoryBalanceSource {
    pub fn new(records: Vec<BalanceChangeRecord>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl BalanceChangeSource for MemoryBalanceSource {
    async fn balance_changes(
        &self,
        balance_id: &str,
    ) -> Result<Vec<BalanceChangeRecord>, IndexerError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.balance_id == balance_id)
            .cloned()
            .collect())
    }
}
