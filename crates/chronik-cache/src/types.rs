//! Core type definitions shared across the cache components.
//!
//! The transaction record is deliberately thin: the cache only inspects
//! `txid`, block placement, `time_first_seen` and the finality hint.
//! Everything else the indexer returns is carried in an opaque flattened
//! payload and round-trips untouched.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Address ids produced by the default resolver (and by eCash indexers)
/// carry this prefix; any subject id without it is treated as a token id
/// for introspection purposes.
pub const ADDRESS_PREFIX: &str = "ecash:";

/// Page size used by `history` when the caller does not specify one, and
/// the hard upper bound accepted by the indexer per page.
pub const DEFAULT_PAGE_SIZE: u32 = 200;

/// Subject namespace. Addresses and tokens live in disjoint key spaces
/// and have independent subscription sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Namespace {
    Address,
    Token,
}

impl Namespace {
    /// Static label used in log lines and metadata keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Token => "token",
        }
    }

    /// Classifies a subject id by its prefix. Addresses are recognizable;
    /// anything else is assumed to be a token id.
    #[must_use]
    pub fn of_subject_id(id: &str) -> Self {
        if id.starts_with(ADDRESS_PREFIX) {
            Self::Address
        } else {
            Self::Token
        }
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-subject cache state.
///
/// `Updating` is derived, never stored: a subject is `Updating` exactly
/// while its update lock is held. The recorded base state defaults to
/// `Unknown` when absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    /// Nothing is known about the subject; the next query starts a build.
    Unknown,
    /// A build task for the subject is admitted to the work queue.
    Updating,
    /// The cached view is believed current and a live subscription exists
    /// (or is being re-established).
    Latest,
    /// The subject exceeds the transaction-count limit and is served by
    /// passthrough until cleared or the count drops.
    Reject,
}

impl CacheStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Updating => "UPDATING",
            Self::Latest => "LATEST",
            Self::Reject => "REJECT",
        }
    }
}

/// Transaction event kinds delivered over the subscription transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxMsgType {
    #[serde(rename = "TX_ADDED_TO_MEMPOOL")]
    AddedToMempool,
    #[serde(rename = "TX_FINALIZED")]
    Finalized,
}

/// Block placement of a confirmed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMeta {
    pub height: i64,
    #[serde(default)]
    pub timestamp: i64,
}

/// A transaction as the cache sees it.
///
/// Only the fields the cache inspects are typed; the rest of the record
/// is preserved in `extra` and serialized back byte-for-byte.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tx {
    pub txid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockMeta>,
    #[serde(default)]
    pub time_first_seen: i64,
    #[serde(default)]
    pub is_final: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Tx {
    /// Returns `true` when the transaction has no block placement yet.
    #[must_use]
    pub fn is_unconfirmed(&self) -> bool {
        self.block.is_none()
    }
}

/// One page of history as returned by the indexer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxHistoryPage {
    pub txs: Vec<Tx>,
    pub num_pages: u32,
    pub num_txs: u64,
}

/// Reason codes attached to non-plain `history` responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ResponseStatus {
    /// Cache is being prepared; the request was too large to passthrough.
    Preparing,
    /// Subject exceeds the cache limit; served by passthrough.
    OverLimit,
    /// Served directly from the indexer.
    Passthrough,
}

impl From<ResponseStatus> for u8 {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Preparing => 1,
            ResponseStatus::OverLimit => 2,
            ResponseStatus::Passthrough => 3,
        }
    }
}

impl TryFrom<u8> for ResponseStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::Preparing),
            2 => Ok(Self::OverLimit),
            3 => Ok(Self::Passthrough),
            other => Err(format!("unknown response status code {other}")),
        }
    }
}

/// Response envelope of `history`.
///
/// A plain cache hit has no `status`; every degraded path carries one so
/// embedding layers can distinguish them without string matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub txs: Vec<Tx>,
    pub num_pages: u32,
    pub num_txs: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ResponseStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HistoryPage {
    /// Plain envelope around a served page.
    #[must_use]
    pub fn plain(txs: Vec<Tx>, num_pages: u32, num_txs: u64) -> Self {
        Self { txs, num_pages, num_txs, status: None, message: None }
    }

    /// Envelope around an indexer passthrough.
    #[must_use]
    pub fn passthrough(page: TxHistoryPage) -> Self {
        Self {
            txs: page.txs,
            num_pages: page.num_pages,
            num_txs: page.num_txs,
            status: Some(ResponseStatus::Passthrough),
            message: None,
        }
    }
}

/// Durable per-subject bookkeeping, stored out-of-band at
/// `metadata:<namespace>:<id>`.
///
/// Timestamps are milliseconds since the Unix epoch. `data_hash` is the
/// content hash of `txOrder` at the moment of the last durable write and
/// is the drift detector for loaded views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub access_count: u64,
    pub created_at: i64,
    pub last_access_at: i64,
    pub updated_at: i64,
    pub data_hash: String,
    pub num_txs: u64,
}

impl CacheMetadata {
    /// Fresh metadata for a subject created now.
    #[must_use]
    pub fn new(now_ms: i64) -> Self {
        Self {
            access_count: 0,
            created_at: now_ms,
            last_access_at: now_ms,
            updated_at: now_ms,
            data_hash: String::new(),
            num_txs: 0,
        }
    }
}
