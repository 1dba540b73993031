//! Which of two conflicting balance changes survives.

use crate::types::BalanceChangeRecord;

/// Returns `true` if `candidate` wins over the conflicting `incumbent`.
///
/// | candidate | incumbent | winner                                   |
/// |-----------|-----------|------------------------------------------|
/// | unconf    | unconf    | the one seen later (replace-by-fee)      |
/// | unconf    | conf      | incumbent                                |
/// | conf      | unconf    | candidate                                |
/// | conf      | conf      | the lower height (deeper burial)         |
///
/// Equal timestamps or heights keep the incumbent.
pub fn should_replace(candidate: &BalanceChangeRecord, incumbent: &BalanceChangeRecord) -> bool {
    match (candidate.is_confirmed(), incumbent.is_confirmed()) {
        (false, false) => candidate.seen_at > incumbent.seen_at,
        (false, true) => false,
        (true, false) => true,
        // Two canonical blocks spending the same output cannot happen on a valid chain.
        (true, true) => match (candidate.height, incumbent.height) {
            (Some(a), Some(b)) => a < b,
            _ => false,
        },
    }
}
