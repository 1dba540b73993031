//! Dependency ordering of surviving balance changes.
//!
//! Kahn's algorithm over "spends an output of" edges. Ties between ready
//! records break on (confirmed first, height, seen time, txid), so the result
//! is deterministic and roughly chronological.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use crate::types::BalanceChangeRecord;

/// Order `records` so that every record comes after the records it spends from.
///
/// Records caught in a spend cycle (corrupt input) are appended in tie-break
/// order rather than dropped.
pub fn dependency_order(mut records: Vec<BalanceChangeRecord>) -> Vec<BalanceChangeRecord> {
    records.sort_by(|a, b| {
        let key = |r: &BalanceChangeRecord| (!r.is_confirmed(), r.height.unwrap_or(u64::MAX), r.seen_at);
        key(a)
            .cmp(&key(b))
            .then_with(|| a.transaction_id.cmp(&b.transaction_id))
    });

    let position: HashMap<&str, usize> = records
        .iter()
        .enumerate()
        .map(|(i, r)| (r.transaction_id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; records.len()];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
    for (i, record) in records.iter().enumerate() {
        for spent in &record.spent_outpoints {
            if let Some(&parent) = position.get(spent.txid.as_str()) {
                if parent != i {
                    dependents[parent].push(i);
                    in_degree[i] += 1;
                }
            }
        }
    }

    let mut ready: BinaryHeap<Reverse<usize>> = in_degree
        .iter()
        .enumerate()
        .filter(|(_, &d)| d == 0)
        .map(|(i, _)| Reverse(i))
        .collect();

    let mut order = Vec::with_capacity(records.len());
    let mut placed = vec![false; records.len()];
    while let Some(Reverse(i)) = ready.pop() {
        order.push(i);
        placed[i] = true;
        for &child in &dependents[i] {
            in_degree[child] = in_degree[child].saturating_sub(1);
            if in_degree[child] == 0 {
                ready.push(Reverse(child));
            }
        }
    }

    if order.len() < records.len() {
        tracing::warn!(
            cyclic = records.len() - order.len(),
            "Spend cycle among balance changes; appending in tie-break order"
        );
        order.extend((0..records.len()).filter(|&i| !placed[i]));
    }

    let mut slots: Vec<Option<BalanceChangeRecord>> = records.into_iter().map(Some).collect();
    order.into_iter().filter_map(|i| slots[i].take()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Outpoint;
    use chrono::{TimeZone, Utc};

    fn rec(txid: &str, seen: i64) -> BalanceChangeRecord {
        BalanceChangeRecord::unconfirmed("addr", txid, Utc.timestamp_opt(seen, 0).unwrap())
    }

    fn ids(records: &[BalanceChangeRecord]) -> Vec<&str> {
        records.iter().map(|r| r.transaction_id.as_str()).collect()
    }

    #[test]
    fn parent_precedes_child_even_if_seen_later() {
        // child was observed before its parent
        let parent = rec("p", 200);
        let child = rec("c", 100).spending(Outpoint::new("p", 0));
        let sorted = dependency_order(vec![child, parent]);
        assert_eq!(ids(&sorted), vec!["p", "c"]);
    }

    #[test]
    fn confirmed_before_unconfirmed() {
        let mut conf = rec("z", 500).in_block("b1");
        conf.height = Some(10);
        let unconf = rec("a", 1);
        let sorted = dependency_order(vec![unconf, conf]);
        assert_eq!(ids(&sorted), vec!["z", "a"]);
    }

    #[test]
    fn chain_of_three() {
        let a = rec("a", 3);
        let b = rec("b", 2).spending(Outpoint::new("a", 0));
        let c = rec("c", 1).spending(Outpoint::new("b", 1));
        let sorted = dependency_order(vec![c, b, a]);
        assert_eq!(ids(&sorted), vec!["a", "b", "c"]);
    }

    #[test]
    fn cycle_keeps_every_record() {
        let a = rec("a", 1).spending(Outpoint::new("b", 0));
        let b = rec("b", 2).spending(Outpoint::new("a", 0));
        let c = rec("c", 3);
        let sorted = dependency_order(vec![a, b, c]);
        assert_eq!(sorted.len(), 3);
        assert_eq!(sorted[0].transaction_id, "c");
    }
}
