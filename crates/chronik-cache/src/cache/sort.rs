//! Deterministic newest-first ordering over transactions.
//!
//! This order is the invariant the content hash is computed over, so it
//! must be total and stable: sorting the same set twice yields the same
//! sequence, assuming `time_first_seen` is unique per txid.

use crate::types::Tx;
use std::{cmp::Ordering, collections::HashMap};

/// Top-level timestamp some indexers attach to mempool records. Absent
/// means 0, which pushes the comparison down to `time_first_seen`.
fn mempool_timestamp(tx: &Tx) -> i64 {
    tx.extra.get("timestamp").and_then(serde_json::Value::as_i64).unwrap_or(0)
}

/// Compares two transactions, newest first.
///
/// - both unconfirmed: larger mempool timestamp first, then larger
///   `time_first_seen`;
/// - exactly one unconfirmed: the unconfirmed one first;
/// - both confirmed: larger block height first, then larger block
///   timestamp, then larger `time_first_seen`.
#[must_use]
pub fn compare_txs_newest_first(a: &Tx, b: &Tx) -> Ordering {
    match (&a.block, &b.block) {
        (None, None) => mempool_timestamp(b)
            .cmp(&mempool_timestamp(a))
            .then_with(|| b.time_first_seen.cmp(&a.time_first_seen)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(block_a), Some(block_b)) => block_b
            .height
            .cmp(&block_a.height)
            .then_with(|| block_b.timestamp.cmp(&block_a.timestamp))
            .then_with(|| b.time_first_seen.cmp(&a.time_first_seen)),
    }
}

/// Sorts a txid sequence in place by looking records up in `tx_map`.
///
/// Ids missing from the map sort last; they indicate a view that is about
/// to be repaired and must not panic the sort.
pub fn sort_tx_order(tx_order: &mut [String], tx_map: &HashMap<String, Tx>) {
    tx_order.sort_by(|a, b| match (tx_map.get(a), tx_map.get(b)) {
        (Some(tx_a), Some(tx_b)) => compare_txs_newest_first(tx_a, tx_b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
