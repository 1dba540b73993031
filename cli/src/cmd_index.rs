//! `balanceindex index` — bulk-write balance-change records from a JSON-lines file.

use anyhow::{Context, Result};
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use balanceindex_core::config::IndexerConfig;
use balanceindex_core::types::BalanceChangeRecord;
use balanceindex_storage::sqlite::SqliteTable;
use balanceindex_storage::BulkIndexer;

/// Parse one record per non-blank line.
pub fn read_records(path: &Path) -> Result<Vec<BalanceChangeRecord>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("open input file '{}'", path.display()))?;

    let mut records = Vec::new();
    for (n, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("read line {} of '{}'", n + 1, path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BalanceChangeRecord = serde_json::from_str(&line)
            .with_context(|| format!("parse record on line {}", n + 1))?;
        records.push(record);
    }
    Ok(records)
}

pub async fn run(config: &IndexerConfig, input: &Path) -> Result<()> {
    let records = read_records(input)?;
    tracing::info!(
        input = %input.display(),
        records = records.len(),
        dry_run = config.no_save,
        "Indexing balance changes"
    );

    let table = SqliteTable::open(&config.storage_path, &config.table)
        .await
        .with_context(|| format!("open table store '{}'", config.storage_path))?;
    let indexer = BulkIndexer::<BalanceChangeRecord>::new(Arc::new(table), config);

    let report = indexer.index_report(&records).await;
    let summary = serde_json::json!({
        "records": records.len(),
        "persisted": report.persisted,
        "committed_batches": report.committed_batches,
        "split_retries": report.split_retries,
        "dropped": report.dropped,
        "failures": report.failures.iter().map(ToString::to_string).collect::<Vec<_>>(),
        "dry_run": config.no_save,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    report.into_result().context("bulk index failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_json_lines_skipping_blanks() {
        let path = std::env::temp_dir().join(format!("balanceindex-records-{}.jsonl", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"{{"balance_id":"alice","transaction_id":"tx1","seen_at":"2024-01-01T00:00:00Z"}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"balance_id":"alice","transaction_id":"tx2","block_id":"b1","seen_at":"2024-01-02T00:00:00Z"}}"#
        )
        .unwrap();
        drop(file);

        let records = read_records(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(records.len(), 2);
        assert!(!records[0].is_confirmed());
        assert_eq!(records[1].block_id.as_deref(), Some("b1"));
    }

    #[test]
    fn bad_line_is_reported_with_its_number() {
        let path = std::env::temp_dir().join(format!("balanceindex-bad-{}.jsonl", std::process::id()));
        std::fs::write(&path, "not json\n").unwrap();
        let err = read_records(&path).unwrap_err();
        std::fs::remove_file(&path).ok();
        assert!(err.to_string().contains("line 1"));
    }
}
