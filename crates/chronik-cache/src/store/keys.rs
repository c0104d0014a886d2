//! Key layout of the durable store.
//!
//! Per subject `S` (the opaque address or token id):
//!
//! ```text
//! <S>:txOrder               flat order list
//! <S>:txMap                 flat map
//! <S>:txOrder:meta          {pageCount, totalTxs}
//! <S>:txOrder:<i>           order chunk i
//! <S>:txMap:meta            {pageCount, totalTxs}
//! <S>:txMap:<i>             map chunk i
//! metadata:address:<id>     CacheMetadata
//! metadata:token:<id>       CacheMetadata
//! ```
//!
//! The `metadata:` prefix is the only place the namespace is recorded; a
//! reader that only sees data keys classifies the subject by its id
//! prefix.

use crate::types::Namespace;
use serde::{Deserialize, Serialize};

/// Maximum entries stored under a single key before the layout switches
/// to the chunked form.
pub const MAX_ITEMS_PER_KEY: usize = 10_000;

/// Capacity of the in-memory metadata LRU fronting the `metadata:` keys.
pub const GLOBAL_METADATA_CACHE_LIMIT: usize = 1_000;

const TX_ORDER_SUFFIX: &str = ":txOrder";
const TX_MAP_SUFFIX: &str = ":txMap";
const METADATA_PREFIX: &str = "metadata:";

/// Header written next to chunked keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub page_count: u32,
    pub total_txs: u64,
}

#[must_use]
pub fn tx_order_base(subject: &str) -> String {
    format!("{subject}{TX_ORDER_SUFFIX}")
}

#[must_use]
pub fn tx_map_base(subject: &str) -> String {
    format!("{subject}{TX_MAP_SUFFIX}")
}

#[must_use]
pub fn chunk_meta_key(base: &str) -> String {
    format!("{base}:meta")
}

#[must_use]
pub fn chunk_key(base: &str, index: u32) -> String {
    format!("{base}:{index}")
}

#[must_use]
pub fn metadata_key(namespace: Namespace, id: &str) -> String {
    format!("{METADATA_PREFIX}{}:{id}", namespace.as_str())
}

/// Parses a `metadata:<ns>:<id>` key back into its parts.
#[must_use]
pub fn parse_metadata_key(key: &str) -> Option<(Namespace, &str)> {
    let rest = key.strip_prefix(METADATA_PREFIX)?;
    if let Some(id) = rest.strip_prefix("address:") {
        Some((Namespace::Address, id))
    } else {
        rest.strip_prefix("token:").map(|id| (Namespace::Token, id))
    }
}

/// Extracts the subject id from any `<S>:txOrder*` key.
#[must_use]
pub fn subject_of_tx_order_key(key: &str) -> Option<&str> {
    key.find(TX_ORDER_SUFFIX).map(|at| &key[..at])
}

/// Coarse key classification used by size accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// `txOrder`/`txMap` data and their chunk headers.
    Transactions,
    /// Out-of-band `metadata:` entries.
    Metadata,
    /// Anything else sharing the store.
    Other,
}

#[must_use]
pub fn classify_key(key: &str) -> KeyKind {
    if key.starts_with(METADATA_PREFIX) {
        KeyKind::Metadata
    } else if key.contains(TX_ORDER_SUFFIX) || key.contains(TX_MAP_SUFFIX) {
        KeyKind::Transactions
    } else {
        KeyKind::Other
    }
}
