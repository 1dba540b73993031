//! Ledger reconciliation — turns raw, possibly stale or conflicting balance
//! changes into one consistent, dependency-ordered view.
//!
//! Steps:
//! 1. Resolve block heights; records in non-canonical blocks become prunable.
//! 2. Keep one record per transaction id (replace rule).
//! 3. Drop unconfirmed records that a confirmed record spends from.
//! 4. Remove double-spend losers until no conflicts remain.
//! 5. Order by dependency, newest first.

use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use crate::chain::ChainIndex;
use crate::error::IndexerError;
use crate::replace::should_replace;
use crate::topo::dependency_order;
use crate::types::{BalanceChangeRecord, BalanceEffect, Outpoint};

/// Builds a [`Ledger`] against a chain index.
#[derive(Default)]
pub struct Reconciler<'a> {
    chain: Option<&'a dyn ChainIndex>,
}

impl<'a> Reconciler<'a> {
    pub fn new() -> Self {
        Self { chain: None }
    }

    /// Set the chain index used for height resolution.
    pub fn with_chain(mut self, chain: &'a dyn ChainIndex) -> Self {
        self.chain = Some(chain);
        self
    }

    /// Reconcile `records`. Fails only if no chain index was supplied.
    pub fn reconcile(&self, records: &[BalanceChangeRecord]) -> Result<Ledger, IndexerError> {
        let chain = self
            .chain
            .ok_or_else(|| IndexerError::InvalidArgument("chain index is required".into()))?;
        Ok(Ledger::new(records, chain))
    }
}

/// Why a record was pulled out of the conflict set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dropped {
    /// Lost to another unconfirmed record.
    Replaced,
    /// Lost to a confirmed record.
    Ignored,
}

/// A reconciled view of one balance.
///
/// Immutable once built. `all` is newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    all: Vec<BalanceChangeRecord>,
    confirmed: Vec<BalanceChangeRecord>,
    unconfirmed: Vec<BalanceChangeRecord>,
    prunable: Vec<BalanceChangeRecord>,
    replaced: Vec<BalanceChangeRecord>,
    ignored: Vec<BalanceChangeRecord>,
}

impl Ledger {
    /// Reconcile `records` against `chain`. Never fails and never mutates input.
    pub fn new(records: &[BalanceChangeRecord], chain: &dyn ChainIndex) -> Self {
        let mut prunable = Vec::new();
        let mut ignored = Vec::new();
        let mut replaced = Vec::new();

        // 1 + 2: height resolution, pruning, per-id dedup
        let mut by_id: BTreeMap<String, BalanceChangeRecord> = BTreeMap::new();
        for record in records {
            let mut record = record.clone();
            let height = match record.block_id.as_deref() {
                Some(block_id) => match chain.try_get_height(block_id) {
                    Some(height) => Some(height),
                    None => {
                        debug!(txid = %record.transaction_id, block = %block_id, "block not canonical, prunable");
                        prunable.push(record);
                        continue;
                    }
                },
                None => None,
            };
            record.height = height;

            match by_id.entry(record.transaction_id.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
                Entry::Occupied(mut slot) => {
                    if supersedes(&record, slot.get()) {
                        ignored.push(slot.insert(record));
                    } else {
                        ignored.push(record);
                    }
                }
            }
        }

        // 3: a confirmed record cannot depend on an unconfirmed one; the
        // unconfirmed copy is a stale index row
        let incoherent: BTreeSet<String> = by_id
            .values()
            .filter(|r| r.is_confirmed())
            .flat_map(|r| r.spent_outpoints.iter())
            .filter(|o| by_id.get(&o.txid).is_some_and(|parent| !parent.is_confirmed()))
            .map(|o| o.txid.clone())
            .collect();
        for txid in incoherent {
            if let Some(stale) = by_id.remove(&txid) {
                debug!(txid = %txid, "unconfirmed parent of a confirmed record, dropped");
                ignored.push(stale);
            }
        }

        // 4: fixed point; each pass strictly shrinks the set
        loop {
            let losers = conflict_losers(&by_id);
            if losers.is_empty() {
                break;
            }
            for (txid, reason) in losers {
                if let Some(loser) = by_id.remove(&txid) {
                    debug!(txid = %txid, ?reason, "double-spend loser removed");
                    match reason {
                        Dropped::Replaced => replaced.push(loser),
                        Dropped::Ignored => ignored.push(loser),
                    }
                }
            }
        }

        // 5: dependency order, then newest first
        let mut all = dependency_order(by_id.into_values().collect());
        all.reverse();
        let (confirmed, unconfirmed): (Vec<_>, Vec<_>) =
            all.iter().cloned().partition(|r| r.is_confirmed());

        info!(
            all = all.len(),
            confirmed = confirmed.len(),
            unconfirmed = unconfirmed.len(),
            prunable = prunable.len(),
            replaced = replaced.len(),
            ignored = ignored.len(),
            "ledger reconciled"
        );

        Self {
            all,
            confirmed,
            unconfirmed,
            prunable,
            replaced,
            ignored,
        }
    }

    /// Surviving records, newest (most dependent) first.
    pub fn all(&self) -> &[BalanceChangeRecord] {
        &self.all
    }

    /// Surviving records, oldest first: every record follows those it spends from.
    pub fn chronological(&self) -> impl Iterator<Item = &BalanceChangeRecord> {
        self.all.iter().rev()
    }

    /// Surviving records that are in a canonical block, newest first.
    pub fn confirmed(&self) -> &[BalanceChangeRecord] {
        &self.confirmed
    }

    /// Surviving records not yet in a block, newest first.
    pub fn unconfirmed(&self) -> &[BalanceChangeRecord] {
        &self.unconfirmed
    }

    /// Records referencing blocks that are no longer canonical; safe to delete
    /// from storage.
    pub fn prunable(&self) -> &[BalanceChangeRecord] {
        &self.prunable
    }

    /// Unconfirmed records that lost a double-spend to another unconfirmed record.
    pub fn replaced(&self) -> &[BalanceChangeRecord] {
        &self.replaced
    }

    /// Records dropped as duplicates, stale parents, or losers to a confirmed
    /// spend. Not deletion candidates.
    pub fn ignored(&self) -> &[BalanceChangeRecord] {
        &self.ignored
    }

    /// Returns `true` if `txid` survived reconciliation.
    pub fn contains(&self, txid: &str) -> bool {
        self.all.iter().any(|r| r.transaction_id == txid)
    }

    /// Net amount of confirmed records.
    pub fn confirmed_balance(&self) -> i128 {
        self.confirmed.iter().map(|r| r.effect.net()).sum()
    }

    /// Net amount of unconfirmed records.
    pub fn unconfirmed_balance(&self) -> i128 {
        self.unconfirmed.iter().map(|r| r.effect.net()).sum()
    }

    /// Net amount of every surviving record.
    pub fn total_balance(&self) -> i128 {
        self.confirmed_balance() + self.unconfirmed_balance()
    }
}

/// Whether `candidate` takes the place of another copy of the same transaction.
///
/// Copies the replace rule cannot separate (same `seen_at`, or same height)
/// fall back to comparing their contents, so the kept copy does not depend
/// on input order.
fn supersedes(candidate: &BalanceChangeRecord, incumbent: &BalanceChangeRecord) -> bool {
    if should_replace(candidate, incumbent) {
        return true;
    }
    if should_replace(incumbent, candidate) {
        return false;
    }
    fn contents(r: &BalanceChangeRecord) -> (&Vec<Outpoint>, &Option<String>, &BalanceEffect) {
        (&r.spent_outpoints, &r.block_id, &r.effect)
    }
    contents(candidate) < contents(incumbent)
}

/// One conflict scan. Confirmed spends claim their outpoints first, then
/// unconfirmed records contest them in txid order.
fn conflict_losers(by_id: &BTreeMap<String, BalanceChangeRecord>) -> BTreeMap<String, Dropped> {
    let mut claims: HashMap<&Outpoint, &str> = HashMap::new();
    let mut losers: BTreeMap<String, Dropped> = BTreeMap::new();

    let confirmed = by_id.values().filter(|r| r.is_confirmed());
    let unconfirmed = by_id.values().filter(|r| !r.is_confirmed());

    for record in confirmed.chain(unconfirmed) {
        let txid = record.transaction_id.as_str();
        if losers.contains_key(txid) {
            continue;
        }
        for spent in &record.spent_outpoints {
            let Some(&claimant_id) = claims.get(spent) else {
                claims.insert(spent, txid);
                continue;
            };
            if claimant_id == txid {
                continue;
            }
            // The claimant already lost this pass; keep the current winner.
            if losers.contains_key(claimant_id) {
                claims.insert(spent, txid);
                continue;
            }
            let Some(claimant) = by_id.get(claimant_id) else {
                claims.insert(spent, txid);
                continue;
            };

            if should_replace(record, claimant) {
                losers.insert(claimant_id.to_string(), dropped_reason(claimant, record));
                claims.insert(spent, txid);
            } else {
                losers.insert(txid.to_string(), dropped_reason(record, claimant));
                break;
            }
        }
    }
    losers
}

fn dropped_reason(loser: &BalanceChangeRecord, winner: &BalanceChangeRecord) -> Dropped {
    if !loser.is_confirmed() && !winner.is_confirmed() {
        Dropped::Replaced
    } else {
        Dropped::Ignored
    }
}
