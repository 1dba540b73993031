//! `balanceindex ledger` — reconcile one balance against a chain snapshot.
//!
//! The chain file is either a map of block id to height, or an ordered
//! array of block headers (`{"id", "parent_id", "height"}`) which must link
//! up from oldest to newest.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use balanceindex_core::chain::{BlockHeader, CanonicalChain, ChainIndex};
use balanceindex_core::config::IndexerConfig;
use balanceindex_core::ledger::Ledger;
use balanceindex_core::source::fetch_ledger;
use balanceindex_storage::sqlite::SqliteTable;
use balanceindex_storage::{TableBackend, TableBalanceSource};

#[derive(Deserialize)]
#[serde(untagged)]
enum ChainFile {
    Headers(Vec<BlockHeader>),
    Heights(HashMap<String, u64>),
}

/// Load a chain index from a JSON file.
pub fn load_chain(path: &Path) -> Result<Box<dyn ChainIndex>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read chain file '{}'", path.display()))?;
    let parsed: ChainFile = serde_json::from_str(&raw)
        .with_context(|| format!("parse chain file '{}'", path.display()))?;

    match parsed {
        ChainFile::Heights(heights) => Ok(Box::new(heights)),
        ChainFile::Headers(headers) => {
            let mut chain = CanonicalChain::new();
            for header in headers {
                let (id, height) = (header.id.clone(), header.height);
                if let Err(depth) = chain.push(header) {
                    bail!("block {id} at height {height} does not extend the chain (fork depth {depth})");
                }
            }
            Ok(Box::new(chain))
        }
    }
}

fn txids(records: &[balanceindex_core::types::BalanceChangeRecord]) -> Vec<&str> {
    records.iter().map(|r| r.transaction_id.as_str()).collect()
}

/// A balance as a JSON number, or a decimal string when it does not fit `i64`.
fn amount(value: i128) -> serde_json::Value {
    match i64::try_from(value) {
        Ok(v) => v.into(),
        Err(_) => value.to_string().into(),
    }
}

/// JSON view of a reconciled ledger.
pub fn summarize(balance_id: &str, ledger: &Ledger) -> serde_json::Value {
    serde_json::json!({
        "balance_id": balance_id,
        "confirmed_balance": amount(ledger.confirmed_balance()),
        "unconfirmed_balance": amount(ledger.unconfirmed_balance()),
        "total_balance": amount(ledger.total_balance()),
        "chronological": ledger.chronological().collect::<Vec<_>>(),
        "confirmed": txids(ledger.confirmed()),
        "unconfirmed": txids(ledger.unconfirmed()),
        "replaced": txids(ledger.replaced()),
        "ignored": txids(ledger.ignored()),
        "prunable": txids(ledger.prunable()),
    })
}

pub async fn run(config: &IndexerConfig, balance_id: &str, chain: &Path, prune: bool) -> Result<()> {
    let chain = load_chain(chain)?;

    let table = SqliteTable::open(&config.storage_path, &config.table)
        .await
        .with_context(|| format!("open table store '{}'", config.storage_path))?;
    table.ensure_table().await.context("create table")?;
    let source = TableBalanceSource::new(Arc::new(table));

    let ledger = fetch_ledger(&source, chain.as_ref(), balance_id)
        .await
        .with_context(|| format!("reconcile balance '{balance_id}'"))?;

    let mut summary = summarize(balance_id, &ledger);
    if prune {
        let deleted = source.prune(&ledger).await.context("prune stale rows")?;
        summary["pruned"] = deleted.into();
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use balanceindex_core::types::BalanceChangeRecord;
    use chrono::{TimeZone, Utc};

    fn write_temp(name: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("balanceindex-{name}-{}.json", std::process::id()));
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn loads_height_map() {
        let path = write_temp("heights", r#"{"b1": 1, "b2": 2}"#);
        let chain = load_chain(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(chain.try_get_height("b2"), Some(2));
        assert_eq!(chain.try_get_height("b3"), None);
    }

    #[test]
    fn loads_linked_headers() {
        let path = write_temp(
            "headers",
            r#"[{"id":"g","parent_id":"","height":0},{"id":"b1","parent_id":"g","height":1}]"#,
        );
        let chain = load_chain(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(chain.try_get_height("b1"), Some(1));
    }

    #[test]
    fn rejects_unlinked_headers() {
        let path = write_temp(
            "forked",
            r#"[{"id":"g","parent_id":"","height":0},{"id":"x","parent_id":"other","height":1}]"#,
        );
        let result = load_chain(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn summary_lists_txids() {
        let seen = Utc.timestamp_opt(0, 0).unwrap();
        let records = vec![
            BalanceChangeRecord::unconfirmed("alice", "t1", seen).in_block("b1"),
            BalanceChangeRecord::unconfirmed("alice", "t2", seen).in_block("gone"),
        ];
        let chain: HashMap<String, u64> = [("b1".to_string(), 1)].into_iter().collect();
        let ledger = Ledger::new(&records, &chain);

        let summary = summarize("alice", &ledger);
        assert_eq!(summary["confirmed"], serde_json::json!(["t1"]));
        assert_eq!(summary["prunable"], serde_json::json!(["t2"]));
    }

    #[test]
    fn oversized_amounts_render_as_strings() {
        assert_eq!(amount(-42), serde_json::json!(-42));
        let big = i128::from(u64::MAX) * 3;
        assert_eq!(amount(big), serde_json::json!(big.to_string()));
    }
}
