//! Reconciliation invariants over generated balance histories.

use std::collections::{HashMap, HashSet};

use chrono::{TimeZone, Utc};

use balanceindex_core::types::{BalanceChangeRecord, Outpoint};
use balanceindex_core::Ledger;

/// Small deterministic generator so failures reproduce.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, n: u64) -> u64 {
        self.next() % n
    }
}

fn chain() -> HashMap<String, u64> {
    (0..10).map(|h| (format!("b{h}"), h)).collect()
}

/// A history with chained spends, duplicates, double spends, and orphaned rows.
fn history(seed: u64) -> Vec<BalanceChangeRecord> {
    let mut rng = Lcg(seed);
    let mut records: Vec<BalanceChangeRecord> = Vec::new();
    for i in 0..40u64 {
        let txid = format!("t{i:02}");
        let seen = Utc.timestamp_opt(1_700_000_000 + rng.below(1_000) as i64, 0).unwrap();
        let mut record = BalanceChangeRecord::unconfirmed("alice", &txid, seen);

        match rng.below(4) {
            0 => {}
            1 | 2 => record = record.in_block(format!("b{}", rng.below(10))),
            _ => record = record.in_block(format!("orphan{}", rng.below(3))),
        }

        // spend an output of an earlier transaction, or an external one
        if i > 0 && rng.below(3) > 0 {
            let parent = rng.below(i);
            record = record.spending(Outpoint::new(format!("t{parent:02}"), rng.below(2) as u32));
        } else if rng.below(2) == 0 {
            record = record.spending(Outpoint::new("external", rng.below(4) as u32));
        }

        // re-index some rows under a different block
        if rng.below(5) == 0 {
            let mut copy = record.clone();
            copy.block_id = Some(format!("b{}", rng.below(10)));
            records.push(copy);
        }
        records.push(record);
    }
    records
}

fn txids(records: &[BalanceChangeRecord]) -> Vec<&str> {
    records.iter().map(|r| r.transaction_id.as_str()).collect()
}

#[test]
fn surviving_set_has_unique_ids_and_no_conflicts() {
    for seed in 1..50 {
        let ledger = Ledger::new(&history(seed), &chain());

        let ids: HashSet<_> = ledger.all().iter().map(|r| &r.transaction_id).collect();
        assert_eq!(ids.len(), ledger.all().len(), "seed {seed}: duplicate txid");

        let mut spent = HashSet::new();
        for record in ledger.all() {
            for outpoint in &record.spent_outpoints {
                assert!(spent.insert(outpoint.clone()), "seed {seed}: {outpoint} spent twice");
            }
        }
    }
}

#[test]
fn chronological_order_respects_dependencies() {
    for seed in 1..50 {
        let ledger = Ledger::new(&history(seed), &chain());
        let position: HashMap<&str, usize> = ledger
            .chronological()
            .enumerate()
            .map(|(i, r)| (r.transaction_id.as_str(), i))
            .collect();

        for record in ledger.chronological() {
            for outpoint in &record.spent_outpoints {
                if let Some(parent) = position.get(outpoint.txid.as_str()) {
                    assert!(
                        *parent < position[record.transaction_id.as_str()],
                        "seed {seed}: {} listed before its parent {}",
                        record.transaction_id,
                        outpoint.txid
                    );
                }
            }
        }
    }
}

#[test]
fn confirmed_records_never_depend_on_unconfirmed_ones() {
    for seed in 1..50 {
        let ledger = Ledger::new(&history(seed), &chain());
        let unconfirmed: HashSet<_> = ledger.unconfirmed().iter().map(|r| &r.transaction_id).collect();
        for record in ledger.confirmed() {
            assert!(record
                .spent_outpoints
                .iter()
                .all(|o| !unconfirmed.contains(&o.txid)));
        }
    }
}

#[test]
fn every_input_is_accounted_for() {
    for seed in 1..50 {
        let records = history(seed);
        let ledger = Ledger::new(&records, &chain());
        let accounted = ledger.all().len()
            + ledger.prunable().len()
            + ledger.replaced().len()
            + ledger.ignored().len();
        assert_eq!(accounted, records.len(), "seed {seed}");
        assert!(ledger
            .prunable()
            .iter()
            .all(|r| r.block_id.as_deref().is_some_and(|b| b.starts_with("orphan"))));
    }
}

#[test]
fn reconciling_twice_changes_nothing() {
    for seed in 1..50 {
        let first = Ledger::new(&history(seed), &chain());
        let second = Ledger::new(first.all(), &chain());
        assert_eq!(txids(first.all()), txids(second.all()), "seed {seed}");
        assert!(second.prunable().is_empty());
        assert!(second.replaced().is_empty());
        assert!(second.ignored().is_empty());
    }
}

#[test]
fn input_order_does_not_matter() {
    for seed in 1..50 {
        let records = history(seed);
        let mut shuffled = records.clone();
        let mut rng = Lcg(seed ^ 0xdead_beef);
        for i in (1..shuffled.len()).rev() {
            let j = rng.below(i as u64 + 1) as usize;
            shuffled.swap(i, j);
        }

        let a = Ledger::new(&records, &chain());
        let b = Ledger::new(&shuffled, &chain());
        assert_eq!(txids(a.all()), txids(b.all()), "seed {seed}");
        assert_eq!(
            a.confirmed_balance() + a.unconfirmed_balance(),
            b.total_balance()
        );
    }
}
