//! Shared types for the balance-change pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Outpoint ─────────────────────────────────────────────────────────────────

/// A reference to one output of a prior transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Outpoint {
    /// Id of the transaction that created the output.
    pub txid: String,
    /// Output index within that transaction.
    pub vout: u32,
}

impl Outpoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl std::fmt::Display for Outpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

// ─── BalanceEffect ────────────────────────────────────────────────────────────

/// A coin moved by a transaction: the output it lives at and its value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coin {
    pub outpoint: Outpoint,
    /// Value in base units (satoshis).
    pub value: u64,
}

/// What a transaction did to one balance.
///
/// Reconciliation never looks inside this; it is carried through to the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BalanceEffect {
    /// Coins paid to the balance.
    #[serde(default)]
    pub received: Vec<Coin>,
    /// Coins taken from the balance.
    #[serde(default)]
    pub spent: Vec<Coin>,
}

impl BalanceEffect {
    /// Net change in base units (received minus spent).
    ///
    /// Widened to `i128` so any number of `u64` coin values sums exactly.
    pub fn net(&self) -> i128 {
        let received: i128 = self.received.iter().map(|c| i128::from(c.value)).sum();
        let spent: i128 = self.spent.iter().map(|c| i128::from(c.value)).sum();
        received - spent
    }
}

// ─── BalanceChangeRecord ──────────────────────────────────────────────────────

/// One transaction's effect on one balance, as written by the upstream indexer.
///
/// The same `transaction_id` may appear several times in raw input (re-indexed
/// after a reorg, seen unconfirmed then confirmed, or written twice).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceChangeRecord {
    /// The balance (address or script) this change belongs to.
    pub balance_id: String,
    /// Transaction id.
    pub transaction_id: String,
    /// Containing block id, or `None` while unconfirmed.
    #[serde(default)]
    pub block_id: Option<String>,
    /// Height of `block_id`; overwritten from the chain index on reconciliation.
    #[serde(default)]
    pub height: Option<u64>,
    /// When the transaction was first observed.
    pub seen_at: DateTime<Utc>,
    /// Outputs this transaction consumes.
    #[serde(default)]
    pub spent_outpoints: Vec<Outpoint>,
    /// Opaque balance effect.
    #[serde(default)]
    pub effect: BalanceEffect,
}

impl BalanceChangeRecord {
    /// Create an unconfirmed record with no spends and no effect.
    pub fn unconfirmed(
        balance_id: impl Into<String>,
        transaction_id: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            balance_id: balance_id.into(),
            transaction_id: transaction_id.into(),
            block_id: None,
            height: None,
            seen_at,
            spent_outpoints: vec![],
            effect: BalanceEffect::default(),
        }
    }

    /// Place the record in a block.
    pub fn in_block(mut self, block_id: impl Into<String>) -> Self {
        self.block_id = Some(block_id.into());
        self
    }

    /// Add a spent outpoint.
    pub fn spending(mut self, outpoint: Outpoint) -> Self {
        self.spent_outpoints.push(outpoint);
        self
    }

    /// Set the balance effect.
    pub fn with_effect(mut self, effect: BalanceEffect) -> Self {
        self.effect = effect;
        self
    }

    /// Returns `true` if the record claims to be in a block.
    pub fn is_confirmed(&self) -> bool {
        self.block_id.is_some()
    }

    /// Returns `true` if this record consumes an output of `txid`.
    pub fn spends_from(&self, txid: &str) -> bool {
        self.spent_outpoints.iter().any(|o| o.txid == txid)
    }

    /// Storage row key: one row per (transaction, block) pair, so re-indexed
    /// copies of a transaction coexist until reconciliation resolves them.
    pub fn row_key(&self) -> String {
        format!(
            "{}-{}",
            self.transaction_id,
            self.block_id.as_deref().unwrap_or("unconfirmed")
        )
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn coin(txid: &str, value: u64) -> Coin {
        Coin {
            outpoint: Outpoint::new(txid, 0),
            value,
        }
    }

    #[test]
    fn effect_net_amount() {
        let effect = BalanceEffect {
            received: vec![coin("a", 5_000), coin("b", 1_000)],
            spent: vec![coin("c", 7_000)],
        };
        assert_eq!(effect.net(), -1_000);
        assert_eq!(BalanceEffect::default().net(), 0);
    }

    #[test]
    fn effect_net_does_not_wrap_on_large_values() {
        let effect = BalanceEffect {
            received: vec![coin("a", u64::MAX), coin("b", 1)],
            spent: vec![],
        };
        assert_eq!(effect.net(), i128::from(u64::MAX) + 1);

        let effect = BalanceEffect {
            received: vec![],
            spent: vec![coin("a", u64::MAX), coin("b", u64::MAX)],
        };
        assert_eq!(effect.net(), -2 * i128::from(u64::MAX));
    }

    #[test]
    fn row_key_distinguishes_blocks() {
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let unconf = BalanceChangeRecord::unconfirmed("addr", "tx1", t);
        let conf = unconf.clone().in_block("b1");
        assert_eq!(unconf.row_key(), "tx1-unconfirmed");
        assert_eq!(conf.row_key(), "tx1-b1");
        assert!(conf.is_confirmed());
        assert!(!unconf.is_confirmed());
    }

    #[test]
    fn record_json_defaults() {
        let json = r#"{
            "balance_id": "addr",
            "transaction_id": "tx1",
            "seen_at": "2024-01-01T00:00:00Z"
        }"#;
        let rec: BalanceChangeRecord = serde_json::from_str(json).unwrap();
        assert!(rec.block_id.is_none());
        assert!(rec.spent_outpoints.is_empty());
        assert_eq!(rec.effect.net(), 0);
    }

    #[test]
    fn spends_from_matches_txid() {
        let t = Utc.timestamp_opt(0, 0).unwrap();
        let rec = BalanceChangeRecord::unconfirmed("addr", "tx2", t).spending(Outpoint::new("tx1", 3));
        assert!(rec.spends_from("tx1"));
        assert!(!rec.spends_from("tx3"));
        assert_eq!(rec.spent_outpoints[0].to_string(), "tx1:3");
    }
}
