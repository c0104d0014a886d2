//! Durable ordered key-value persistence.
//!
//! The cache treats its store as a flat, lexicographically ordered map of
//! string keys to opaque byte values. Two implementations are provided:
//! [`SledStore`] for durable deployments and [`MemoryStore`] for tests and
//! ephemeral embedding.
//!
//! Single-writer discipline: exactly one process may write a given store.
//! This is a documented contract, not something the layer enforces.

mod memory;
mod sled_store;

pub use memory::MemoryStore;
pub use sled_store::SledStore;

use thiserror::Error;

/// Errors from the key-value layer.
///
/// Absent keys are `Ok(None)`, never an error; `StoreError` means the
/// store itself failed.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<sled::Error> for StoreError {
    fn from(err: sled::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Ordered key-value map with atomic single-key writes.
///
/// All methods are synchronous; callers on async tasks invoke them
/// directly, as individual operations are short.
pub trait KvStore: Send + Sync {
    /// Reads a key. Absent keys are `Ok(None)`.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Writes a key atomically, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Deletes a key. Deleting an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Returns all entries whose key starts with `prefix`, in
    /// lexicographic key order.
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Returns every entry in lexicographic key order.
    fn iter_all(&self) -> Result<Vec<(String, Vec<u8>)>, StoreError>;

    /// Removes every entry.
    fn clear(&self) -> Result<(), StoreError>;
}
