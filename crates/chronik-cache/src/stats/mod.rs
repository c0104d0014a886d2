//! Read-only aggregation over the durable layout and live engine state.

use crate::{
    cache::engine::CacheEngine,
    client::ChronikClientInterface,
    config::CacheConfig,
    error::CacheError,
    types::{CacheMetadata, CacheStatus, Namespace},
};
use serde::Serialize;
use std::{collections::BTreeMap, sync::Arc};

/// Cap on sample subjects reported per state.
const SAMPLES_PER_STATE: usize = 5;

/// One sampled subject in a state bucket.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectSample {
    pub subject: String,
    pub namespace: Namespace,
    pub created_at: i64,
    pub last_access_at: i64,
    pub access_count: u64,
    pub num_txs: u64,
}

impl SubjectSample {
    fn new(subject: &str, namespace: Namespace, meta: &CacheMetadata) -> Self {
        Self {
            subject: subject.to_owned(),
            namespace,
            created_at: meta.created_at,
            last_access_at: meta.last_access_at,
            access_count: meta.access_count,
            num_txs: meta.num_txs,
        }
    }
}

/// Durable size report by key classification.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeStats {
    pub total_bytes: u64,
    pub transactions_bytes: u64,
    pub metadata_bytes: u64,
    pub other_bytes: u64,
}

/// Live in-memory occupancy gauges.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub address_views: usize,
    pub token_views: usize,
    pub build_queue_pending: usize,
    pub repair_queue_pending: usize,
    pub address_subscriptions: usize,
    pub token_subscriptions: usize,
}

/// Full statistics report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub total_subjects: usize,
    pub status_counts: BTreeMap<&'static str, usize>,
    pub samples: BTreeMap<&'static str, Vec<SubjectSample>>,
    pub size: SizeStats,
    pub memory: MemoryStats,
    pub config: CacheConfig,
}

/// Builds the report: subjects are counted by projecting `*:txOrder*`
/// keys, states are the engine's derived view, and samples are capped at
/// five per state.
///
/// # Errors
///
/// Returns `CacheError::Store` when the durable scan fails.
pub async fn collect<C: ChronikClientInterface>(
    engine: &Arc<CacheEngine<C>>,
) -> Result<Statistics, CacheError> {
    let store = engine.store();
    let subjects = store.list_subjects()?;

    let mut status_counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut samples: BTreeMap<&'static str, Vec<SubjectSample>> = BTreeMap::new();
    for status in
        [CacheStatus::Unknown, CacheStatus::Updating, CacheStatus::Latest, CacheStatus::Reject]
    {
        status_counts.insert(status.as_str(), 0);
        samples.insert(status.as_str(), Vec::new());
    }

    for subject in &subjects {
        let namespace = Namespace::of_subject_id(subject);
        let status = engine.cache_status(namespace, subject).as_str();
        *status_counts.entry(status).or_default() += 1;

        let bucket = samples.entry(status).or_default();
        if bucket.len() < SAMPLES_PER_STATE {
            if let Some(meta) = store.read_metadata(namespace, subject)? {
                bucket.push(SubjectSample::new(subject, namespace, &meta));
            }
        }
    }

    let breakdown = store.calculate_size()?;
    let size = SizeStats {
        total_bytes: breakdown.total,
        transactions_bytes: breakdown.transactions,
        metadata_bytes: breakdown.metadata,
        other_bytes: breakdown.other,
    };

    let (address_views, token_views, build_pending, repair_pending) = engine.gauges();
    let (address_subscriptions, token_subscriptions) =
        engine.notify().subscription_counts().await;
    let memory = MemoryStats {
        address_views,
        token_views,
        build_queue_pending: build_pending,
        repair_queue_pending: repair_pending,
        address_subscriptions,
        token_subscriptions,
    };

    Ok(Statistics {
        total_subjects: subjects.len(),
        status_counts,
        samples,
        size,
        memory,
        config: engine.config().clone(),
    })
}
