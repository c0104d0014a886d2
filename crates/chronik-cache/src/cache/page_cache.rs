//! In-memory tier of the two-tier read path.
//!
//! One instance per namespace maps subject id to a loaded view with an
//! expiry. Hits extend the expiry a little; a periodic sweep drops
//! whatever expired. Entries are `Arc`-shared so serving a page never
//! clones the view.

use crate::store::SubjectData;
use dashmap::DashMap;
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;
use tracing::trace;

/// Initial lifetime of a loaded view.
pub const PAGE_CACHE_TTL: Duration = Duration::from_secs(120);

/// Lifetime extension granted per hit.
pub const PAGE_CACHE_TOUCH_EXTENSION: Duration = Duration::from_secs(10);

/// Sweep interval for dropping expired entries.
pub const PAGE_CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

struct PageEntry {
    data: Arc<SubjectData>,
    expiry: Instant,
}

/// Expiring view cache for one namespace.
#[derive(Default)]
pub struct PageCache {
    entries: DashMap<String, PageEntry>,
}

impl PageCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live view for a subject, extending its lifetime.
    #[must_use]
    pub fn get(&self, subject: &str) -> Option<Arc<SubjectData>> {
        let mut entry = self.entries.get_mut(subject)?;
        if entry.expiry <= Instant::now() {
            drop(entry);
            self.entries.remove(subject);
            trace!(subject = subject, "memory view expired on access");
            return None;
        }
        entry.expiry += PAGE_CACHE_TOUCH_EXTENSION;
        Some(Arc::clone(&entry.data))
    }

    /// Installs a freshly loaded view with the full TTL.
    pub fn insert(&self, subject: &str, data: Arc<SubjectData>) {
        self.entries
            .insert(subject.to_owned(), PageEntry { data, expiry: Instant::now() + PAGE_CACHE_TTL });
    }

    /// Drops a subject's view.
    pub fn invalidate(&self, subject: &str) {
        self.entries.remove(subject);
    }

    /// Drops everything.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of live entries (expired ones included until swept).
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops expired entries. Called by the engine's sweeper.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expiry > now);
    }
}
