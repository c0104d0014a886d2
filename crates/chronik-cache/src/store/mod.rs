//! Durable layout of cached transaction sets.
//!
//! One subject owns three pieces of durable state: its transaction map,
//! its newest-first order list, and an out-of-band metadata record. Sets
//! above [`keys::MAX_ITEMS_PER_KEY`] entries are split into chunk keys
//! with a small header; readers prefer the chunked form whenever a header
//! exists.
//!
//! Writes are content-addressed: a write whose order hashes to the value
//! already recorded in metadata is a no-op. Mutation is serialized per
//! subject by the engine's update lock; this module performs no locking
//! of its own beyond the metadata LRU.

pub mod keys;

use crate::{
    cache::hash::hash_tx_order,
    error::CacheError,
    kv::KvStore,
    types::{CacheMetadata, Namespace, Tx},
};
use keys::{ChunkHeader, GLOBAL_METADATA_CACHE_LIMIT, MAX_ITEMS_PER_KEY};
use lru::LruCache;
use parking_lot::Mutex;
use std::{collections::HashMap, num::NonZeroUsize, sync::Arc};
use tracing::{debug, info, warn};

/// In-memory image of one subject's durable state.
#[derive(Debug, Clone, Default)]
pub struct SubjectData {
    pub tx_map: HashMap<String, Tx>,
    pub tx_order: Vec<String>,
}

impl SubjectData {
    #[must_use]
    pub fn num_txs(&self) -> u64 {
        self.tx_order.len() as u64
    }
}

/// Size report produced by [`SubjectStore::calculate_size`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SizeBreakdown {
    pub total: u64,
    pub transactions: u64,
    pub metadata: u64,
    pub other: u64,
}

/// Durable persistence for subjects, fronted by a bounded metadata LRU.
pub struct SubjectStore {
    kv: Arc<dyn KvStore>,
    metadata_lru: Mutex<LruCache<String, CacheMetadata>>,
}

impl SubjectStore {
    #[must_use]
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        let capacity = NonZeroUsize::new(GLOBAL_METADATA_CACHE_LIMIT)
            .expect("metadata cache limit is non-zero");
        Self { kv, metadata_lru: Mutex::new(LruCache::new(capacity)) }
    }

    /// The underlying key-value store, exposed for stats scans.
    #[must_use]
    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    // --- Metadata ---

    /// Reads a subject's metadata, memory tier first.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure or
    /// `CacheError::Serialization` on a corrupt record.
    pub fn read_metadata(
        &self,
        namespace: Namespace,
        id: &str,
    ) -> Result<Option<CacheMetadata>, CacheError> {
        let key = keys::metadata_key(namespace, id);
        if let Some(meta) = self.metadata_lru.lock().get(&key) {
            return Ok(Some(meta.clone()));
        }

        let Some(raw) = self.kv.get(&key)? else {
            return Ok(None);
        };
        let meta: CacheMetadata = serde_json::from_slice(&raw)?;
        self.metadata_lru.lock().put(key, meta.clone());
        Ok(Some(meta))
    }

    /// Writes metadata to both tiers.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub fn write_metadata(
        &self,
        namespace: Namespace,
        id: &str,
        meta: &CacheMetadata,
    ) -> Result<(), CacheError> {
        let key = keys::metadata_key(namespace, id);
        self.kv.put(&key, &serde_json::to_vec(meta)?)?;
        self.metadata_lru.lock().put(key, meta.clone());
        Ok(())
    }

    fn delete_metadata(&self, namespace: Namespace, id: &str) -> Result<(), CacheError> {
        let key = keys::metadata_key(namespace, id);
        self.kv.delete(&key)?;
        self.metadata_lru.lock().pop(&key);
        Ok(())
    }

    // --- Subject data ---

    /// Loads a subject's full view, preferring the chunked form when a
    /// chunk header exists. A successful read bumps `access_count` and
    /// `last_access_at`.
    ///
    /// Returns `Ok(None)` when the subject has never been written (or its
    /// halves are inconsistent, which the next build repairs).
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` / `CacheError::Serialization` on
    /// backend or decode failure.
    pub fn read_subject(
        &self,
        namespace: Namespace,
        id: &str,
    ) -> Result<Option<SubjectData>, CacheError> {
        let Some(tx_order) = self.read_order(id)? else {
            return Ok(None);
        };
        let Some(tx_map) = self.read_map(id)? else {
            warn!(subject = id, "txOrder present without txMap, treating subject as absent");
            return Ok(None);
        };

        if let Some(mut meta) = self.read_metadata(namespace, id)? {
            meta.access_count += 1;
            meta.last_access_at = Self::now_ms();
            self.write_metadata(namespace, id, &meta)?;
        }

        Ok(Some(SubjectData { tx_map, tx_order }))
    }

    fn read_order(&self, id: &str) -> Result<Option<Vec<String>>, CacheError> {
        let base = keys::tx_order_base(id);
        if let Some(header) = self.read_chunk_header(&base)? {
            let mut order = Vec::with_capacity(header.total_txs as usize);
            for i in 0..header.page_count {
                let Some(raw) = self.kv.get(&keys::chunk_key(&base, i))? else {
                    warn!(subject = id, chunk = i, "missing txOrder chunk");
                    return Ok(None);
                };
                let mut chunk: Vec<String> = serde_json::from_slice(&raw)?;
                order.append(&mut chunk);
            }
            return Ok(Some(order));
        }

        match self.kv.get(&base)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn read_map(&self, id: &str) -> Result<Option<HashMap<String, Tx>>, CacheError> {
        let base = keys::tx_map_base(id);
        if let Some(header) = self.read_chunk_header(&base)? {
            let mut map = HashMap::with_capacity(header.total_txs as usize);
            for i in 0..header.page_count {
                let Some(raw) = self.kv.get(&keys::chunk_key(&base, i))? else {
                    warn!(subject = id, chunk = i, "missing txMap chunk");
                    return Ok(None);
                };
                let chunk: HashMap<String, Tx> = serde_json::from_slice(&raw)?;
                map.extend(chunk);
            }
            return Ok(Some(map));
        }

        match self.kv.get(&base)? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn read_chunk_header(&self, base: &str) -> Result<Option<ChunkHeader>, CacheError> {
        match self.kv.get(&keys::chunk_meta_key(base))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    /// Persists a subject's view, flat or chunked depending on size.
    ///
    /// Skips entirely (returns `Ok(false)`) when the order hashes to the
    /// value already recorded in metadata. Otherwise replaces the previous
    /// form, then writes metadata with the new hash, count and timestamp.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` / `CacheError::Serialization` on
    /// backend or encode failure.
    pub fn write_subject(
        &self,
        namespace: Namespace,
        id: &str,
        data: &SubjectData,
    ) -> Result<bool, CacheError> {
        let new_hash = hash_tx_order(&data.tx_order);
        let existing = self.read_metadata(namespace, id)?;
        if let Some(meta) = &existing {
            if meta.data_hash == new_hash {
                debug!(subject = id, "unchanged order hash, skipping write");
                return Ok(false);
            }
        }

        // Replace whichever form was on disk before writing the new one,
        // so a shrinking subject never leaves stale chunks behind.
        self.delete_paginated(&keys::tx_order_base(id))?;
        self.delete_paginated(&keys::tx_map_base(id))?;

        if data.tx_order.len() <= MAX_ITEMS_PER_KEY {
            self.kv.put(&keys::tx_order_base(id), &serde_json::to_vec(&data.tx_order)?)?;
            self.kv.put(&keys::tx_map_base(id), &serde_json::to_vec(&data.tx_map)?)?;
        } else {
            self.write_chunked(id, data)?;
        }

        let now = Self::now_ms();
        let mut meta = existing.unwrap_or_else(|| CacheMetadata::new(now));
        meta.data_hash = new_hash;
        meta.num_txs = data.num_txs();
        meta.updated_at = now;
        self.write_metadata(namespace, id, &meta)?;

        debug!(subject = id, num_txs = data.num_txs(), "subject persisted");
        Ok(true)
    }

    fn write_chunked(&self, id: &str, data: &SubjectData) -> Result<(), CacheError> {
        let total = data.tx_order.len();
        let page_count = total.div_ceil(MAX_ITEMS_PER_KEY) as u32;
        let header = ChunkHeader { page_count, total_txs: total as u64 };

        let order_base = keys::tx_order_base(id);
        let map_base = keys::tx_map_base(id);

        for (i, ids) in data.tx_order.chunks(MAX_ITEMS_PER_KEY).enumerate() {
            let i = i as u32;
            self.kv.put(&keys::chunk_key(&order_base, i), &serde_json::to_vec(&ids)?)?;

            let submap: HashMap<&String, &Tx> =
                ids.iter().filter_map(|txid| data.tx_map.get(txid).map(|tx| (txid, tx))).collect();
            self.kv.put(&keys::chunk_key(&map_base, i), &serde_json::to_vec(&submap)?)?;
        }

        self.kv.put(&keys::chunk_meta_key(&order_base), &serde_json::to_vec(&header)?)?;
        self.kv.put(&keys::chunk_meta_key(&map_base), &serde_json::to_vec(&header)?)?;
        Ok(())
    }

    /// Deletes a key in whichever form it is stored: when a chunk header
    /// exists, every chunk and the header go; otherwise the flat key.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub fn delete_paginated(&self, base: &str) -> Result<(), CacheError> {
        if let Some(header) = self.read_chunk_header(base)? {
            for i in 0..header.page_count {
                self.kv.delete(&keys::chunk_key(base, i))?;
            }
            self.kv.delete(&keys::chunk_meta_key(base))?;
        } else {
            self.kv.delete(base)?;
        }
        Ok(())
    }

    /// Removes every trace of a subject: data keys and metadata.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub fn clear_subject(&self, namespace: Namespace, id: &str) -> Result<(), CacheError> {
        self.delete_paginated(&keys::tx_order_base(id))?;
        self.delete_paginated(&keys::tx_map_base(id))?;
        self.delete_metadata(namespace, id)?;
        info!(subject = id, namespace = %namespace, "subject cleared");
        Ok(())
    }

    /// Removes everything, including foreign keys sharing the store.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub fn clear_all(&self) -> Result<(), CacheError> {
        self.kv.clear()?;
        self.metadata_lru.lock().clear();
        info!("durable store cleared");
        Ok(())
    }

    /// Sums UTF-8 byte lengths of every key and serialized value, broken
    /// down by key classification.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub fn calculate_size(&self) -> Result<SizeBreakdown, CacheError> {
        let mut breakdown = SizeBreakdown::default();
        for (key, value) in self.kv.iter_all()? {
            let bytes = (key.len() + value.len()) as u64;
            breakdown.total += bytes;
            match keys::classify_key(&key) {
                keys::KeyKind::Transactions => breakdown.transactions += bytes,
                keys::KeyKind::Metadata => breakdown.metadata += bytes,
                keys::KeyKind::Other => breakdown.other += bytes,
            }
        }
        Ok(breakdown)
    }

    /// Evicts least-accessed subjects until total size fits under
    /// `max_bytes`.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::LimitExceeded` when deleting every known
    /// subject still cannot satisfy the ceiling (foreign data dominates
    /// the store), `CacheError::Store` on backend failure.
    pub fn clean_least_accessed(&self, max_bytes: u64) -> Result<(), CacheError> {
        let mut total = self.calculate_size()?.total;
        if total <= max_bytes {
            return Ok(());
        }

        let mut subjects: Vec<(Namespace, String, CacheMetadata)> = Vec::new();
        for (key, value) in self.kv.scan_prefix("metadata:")? {
            let Some((namespace, id)) = keys::parse_metadata_key(&key) else {
                continue;
            };
            match serde_json::from_slice::<CacheMetadata>(&value) {
                Ok(meta) => subjects.push((namespace, id.to_owned(), meta)),
                Err(err) => warn!(key = %key, error = %err, "skipping unreadable metadata"),
            }
        }
        subjects.sort_by_key(|(_, _, meta)| meta.access_count);

        for (namespace, id, meta) in subjects {
            info!(
                subject = %id,
                access_count = meta.access_count,
                total_bytes = total,
                "evicting least-accessed subject"
            );
            self.clear_subject(namespace, &id)?;
            total = self.calculate_size()?.total;
            if total <= max_bytes {
                return Ok(());
            }
        }

        Err(CacheError::LimitExceeded(format!(
            "store still holds {total} bytes after evicting all subjects (ceiling {max_bytes})"
        )))
    }

    /// Projects subject ids out of the `*:txOrder*` keys, deduplicated,
    /// in key order.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub fn list_subjects(&self) -> Result<Vec<String>, CacheError> {
        let mut out: Vec<String> = Vec::new();
        for (key, _) in self.kv.iter_all()? {
            if let Some(subject) = keys::subject_of_tx_order_key(&key) {
                if out.last().map(String::as_str) != Some(subject) {
                    out.push(subject.to_owned());
                }
            }
        }
        out.dedup();
        Ok(out)
    }
}
