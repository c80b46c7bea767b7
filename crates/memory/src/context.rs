//! Context assembly: merge tier reads and fit them to a token budget.

use chrono::{DateTime, Utc};
use meshbrain_core::turn::{TierRecord, Turn};
use std::collections::BTreeMap;

/// Merge HOT and WARM reads into the newest turns that fit `budget`,
/// returned oldest first.
///
/// Turns are identified by timestamp (both reads are for one user); the HOT
/// copy wins when a turn appears in both. Selection stops at the first turn
/// that would overflow the budget, so the result is always a contiguous
/// suffix of the history.
pub fn assemble(hot: Vec<TierRecord>, warm: Vec<TierRecord>, budget: usize) -> Vec<Turn> {
    let mut merged: BTreeMap<DateTime<Utc>, Turn> = BTreeMap::new();
    for record in warm {
        merged.insert(record.turn.timestamp, record.turn);
    }
    for record in hot {
        merged.insert(record.turn.timestamp, record.turn);
    }

    let mut used = 0usize;
    let mut selected: Vec<Turn> = merged
        .into_values()
        .rev()
        .take_while(|turn| {
            let cost = turn.estimated_tokens();
            if used + cost > budget {
                return false;
            }
            used += cost;
            true
        })
        .collect();
    selected.reverse();
    selected
}

/// Total token estimate of a set of records.
pub fn tokens_of(records: &[TierRecord]) -> usize {
    records.iter().map(|r| r.turn.estimated_tokens()).sum()
}
