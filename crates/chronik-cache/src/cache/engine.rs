//! Per-subject cache state machine and background coordination.
//!
//! Every subject moves through `Unknown → Updating → Latest`, with
//! `Reject` as the refusal state for over-limit subjects. `Updating` is
//! derived from update-lock presence, never recorded. Mutation of a
//! subject's durable state is serialized by its update lock; builds and
//! repairs run on two bounded queues so a burst of cold subjects cannot
//! starve the process.

use crate::{
    cache::{
        hash::hash_tx_order,
        page_cache::{PageCache, PAGE_CACHE_SWEEP_INTERVAL},
        sort::sort_tx_order,
    },
    client::ChronikClientInterface,
    config::CacheConfig,
    error::CacheError,
    failover::FailoverHandler,
    kv::KvStore,
    notify::{EventCallback, NotifyManager, SubjectCallback},
    queue::TaskQueue,
    store::{SubjectData, SubjectStore},
    types::{
        CacheStatus, HistoryPage, Namespace, ResponseStatus, Tx, TxHistoryPage, TxMsgType,
        DEFAULT_PAGE_SIZE,
    },
};
use ahash::RandomState;
use dashmap::{DashMap, DashSet};
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Weak,
};
use tokio::{sync::broadcast, time::sleep};
use tracing::{debug, error, info, warn};

/// Concurrency of the background build queue.
const BUILD_QUEUE_LIMIT: usize = 2;

/// Concurrency of the per-transaction repair queue.
const REPAIR_QUEUE_LIMIT: usize = 5;

/// Subjects at or above this many cached transactions persist every 10th
/// build iteration instead of every iteration.
const WRITE_THROTTLE_THRESHOLD: usize = 2000;

/// Iterations between persists once the throttle engages.
const WRITE_THROTTLE_STRIDE: u32 = 10;

/// Debounce window for notification events, per `(subject, msg_type)`.
const EVENT_DEBOUNCE: std::time::Duration = std::time::Duration::from_millis(500);

/// Releases a subject's update lock on every exit path, panics included.
struct UpdateGuard {
    locks: Arc<DashSet<String, RandomState>>,
    key: String,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        self.locks.remove(&self.key);
    }
}

struct DebounceEntry {
    generation: u64,
    txid: String,
}

/// A placed transaction is final as far as the cache is concerned,
/// whatever the indexer's hint said. Applied at every ingestion point so
/// a mislabeled hint never survives into the durable view.
fn normalize_finality(tx: &mut Tx) {
    if tx.block.is_some() {
        tx.is_final = true;
    }
}

/// The cache engine. One instance owns all mutable state: status maps,
/// update locks, memory views, debounce registry, queues and the
/// notification manager. Lifecycle is bounded by construction and
/// [`CacheEngine::destroy`]; there are no process-wide globals.
pub struct CacheEngine<C: ChronikClientInterface> {
    client: Arc<C>,
    store: Arc<SubjectStore>,
    config: CacheConfig,
    failover: FailoverHandler,
    notify: Arc<NotifyManager>,

    /// Recorded base status per `<ns>:<id>`. `Updating` never lands here.
    statuses: DashMap<String, CacheStatus, RandomState>,
    update_locks: Arc<DashSet<String, RandomState>>,

    build_queue: Arc<TaskQueue>,
    repair_queue: Arc<TaskQueue>,

    address_views: Arc<PageCache>,
    token_views: Arc<PageCache>,

    debounce: DashMap<(String, TxMsgType), DebounceEntry, RandomState>,
    debounce_seq: AtomicU64,

    shutdown: broadcast::Sender<()>,
    destroyed: AtomicBool,
}

impl<C: ChronikClientInterface> CacheEngine<C> {
    /// Builds an engine over `client` and `kv` and starts its background
    /// tasks (view sweeper, event dispatch).
    pub fn new(client: Arc<C>, kv: Arc<dyn KvStore>, config: CacheConfig) -> Arc<Self> {
        let store = Arc::new(SubjectStore::new(kv));
        let failover = FailoverHandler::new(config.failover.clone());
        let (shutdown, _) = broadcast::channel(1);

        let engine = Arc::new_cyclic(|weak: &Weak<Self>| {
            let on_evict: SubjectCallback = {
                let weak = weak.clone();
                Arc::new(move |subject: &str, namespace: Namespace| {
                    if let Some(engine) = weak.upgrade() {
                        engine.handle_evicted(namespace, subject);
                    }
                })
            };
            let notify = Arc::new(NotifyManager::new(
                client.ws(),
                config.max_subscriptions,
                config.ws_timeout(),
                config.ws_extend_timeout(),
                on_evict,
            ));

            Self {
                client,
                store,
                failover,
                notify,
                statuses: DashMap::with_hasher(RandomState::new()),
                update_locks: Arc::new(DashSet::with_hasher(RandomState::new())),
                build_queue: Arc::new(TaskQueue::new(BUILD_QUEUE_LIMIT)),
                repair_queue: Arc::new(TaskQueue::new(REPAIR_QUEUE_LIMIT)),
                address_views: Arc::new(PageCache::new()),
                token_views: Arc::new(PageCache::new()),
                debounce: DashMap::with_hasher(RandomState::new()),
                debounce_seq: AtomicU64::new(0),
                shutdown,
                destroyed: AtomicBool::new(false),
                config,
            }
        });

        engine.notify.start();
        engine.start_view_sweeper();
        engine
    }

    fn start_view_sweeper(self: &Arc<Self>) {
        let address_views = Arc::clone(&self.address_views);
        let token_views = Arc::clone(&self.token_views);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PAGE_CACHE_SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        address_views.sweep();
                        token_views.sweep();
                    }
                }
            }
            debug!("view sweeper stopped");
        });
    }

    // --- Accessors ---

    fn status_key(namespace: Namespace, id: &str) -> String {
        format!("{}:{id}", namespace.as_str())
    }

    fn views(&self, namespace: Namespace) -> &PageCache {
        match namespace {
            Namespace::Address => &self.address_views,
            Namespace::Token => &self.token_views,
        }
    }

    /// The derived per-subject status. A held update lock always reads
    /// as `Updating`; otherwise the recorded base state, defaulting to
    /// `Unknown`.
    #[must_use]
    pub fn cache_status(&self, namespace: Namespace, id: &str) -> CacheStatus {
        let key = Self::status_key(namespace, id);
        if self.update_locks.contains(&key) {
            return CacheStatus::Updating;
        }
        self.statuses.get(&key).map_or(CacheStatus::Unknown, |s| *s)
    }

    fn recorded_status(&self, namespace: Namespace, id: &str) -> CacheStatus {
        self.statuses
            .get(&Self::status_key(namespace, id))
            .map_or(CacheStatus::Unknown, |s| *s)
    }

    fn set_status(&self, namespace: Namespace, id: &str, status: CacheStatus) {
        debug_assert!(status != CacheStatus::Updating, "Updating is derived, never recorded");
        self.statuses.insert(Self::status_key(namespace, id), status);
    }

    /// The durable store, exposed for stats aggregation.
    #[must_use]
    pub fn store(&self) -> &Arc<SubjectStore> {
        &self.store
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// The notification manager, exposed for stats aggregation.
    #[must_use]
    pub fn notify(&self) -> &Arc<NotifyManager> {
        &self.notify
    }

    /// Live occupancy gauges: `(address views, token views, build queue
    /// pending, repair queue pending)`.
    #[must_use]
    pub fn gauges(&self) -> (usize, usize, usize, usize) {
        (
            self.address_views.len(),
            self.token_views.len(),
            self.build_queue.queue_len(),
            self.repair_queue.queue_len(),
        )
    }

    // --- Indexer access ---

    async fn fetch_history(
        &self,
        namespace: Namespace,
        id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<TxHistoryPage, CacheError> {
        let started = std::time::Instant::now();
        let result = self
            .failover
            .execute_with_retry(
                || async {
                    match namespace {
                        Namespace::Address => {
                            self.client.address_history(id, page, page_size).await
                        }
                        Namespace::Token => self.client.token_history(id, page, page_size).await,
                    }
                },
                "indexer history fetch",
            )
            .await;
        if self.config.enable_timer {
            debug!(
                subject = id,
                page = page,
                page_size = page_size,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "indexer history fetch timed"
            );
        }
        result
    }

    // --- Entry point ---

    /// Serves one page of a subject's history.
    ///
    /// Cold subjects get an indexer passthrough while a background build
    /// fills the durable store; warm subjects are served from the
    /// two-tier cache; over-limit subjects are refused with a tagged
    /// passthrough.
    ///
    /// # Errors
    ///
    /// Surfaces indexer/transport errors once retries are exhausted, and
    /// `CacheError::OutOfRange` for a page past the cached end.
    pub async fn history(
        self: &Arc<Self>,
        namespace: Namespace,
        id: &str,
        page_offset: u32,
        page_size: u32,
    ) -> Result<HistoryPage, CacheError> {
        if self.destroyed.load(Ordering::SeqCst) {
            return Err(CacheError::Shutdown);
        }
        let page_size = page_size.max(1);

        // Refusal path: passthrough, capped at the indexer's page limit.
        if self.cache_status(namespace, id) == CacheStatus::Reject {
            let page = self
                .fetch_history(namespace, id, page_offset, page_size.min(DEFAULT_PAGE_SIZE))
                .await?;
            // A recheck lets the flag clear once the count drops back
            // under the limit.
            self.spawn_check_and_update(namespace, id, page.num_txs, false);
            return Ok(HistoryPage {
                txs: page.txs,
                num_pages: page.num_pages,
                num_txs: page.num_txs,
                status: Some(ResponseStatus::OverLimit),
                message: Some(format!(
                    "subject {id} exceeds cache limit of {} transactions, serving from indexer",
                    self.config.max_tx_limit
                )),
            });
        }

        let status = self.cache_status(namespace, id);

        // Keep the subscription alive for warm subjects, and re-establish
        // one that lapsed.
        let remaining = self.notify.remaining_time(namespace, id).await;
        if !remaining.active && status == CacheStatus::Latest {
            self.spawn_attach(namespace, id);
        }
        if remaining.active || status == CacheStatus::Latest {
            let on_expire = self.evict_callback();
            self.notify.reset_timer(namespace, id, on_expire).await;
        }

        if status != CacheStatus::Latest {
            let probe = self.fetch_history(namespace, id, 0, 1).await?;
            let api_num_txs = probe.num_txs;

            if status != CacheStatus::Updating {
                self.spawn_check_and_update(namespace, id, api_num_txs, false);
            }

            if page_size > DEFAULT_PAGE_SIZE {
                return Ok(HistoryPage {
                    txs: Vec::new(),
                    num_pages: 0,
                    num_txs: 0,
                    status: Some(ResponseStatus::Preparing),
                    message: Some(format!(
                        "history for {id} is being prepared, retry with a page size of at most \
                         {DEFAULT_PAGE_SIZE} or try again shortly"
                    )),
                });
            }

            let page = self.fetch_history(namespace, id, page_offset, page_size).await?;
            return Ok(HistoryPage::passthrough(page));
        }

        match self.serve_from_cache(namespace, id, page_offset, page_size).await? {
            Some(page) => Ok(page),
            None => {
                debug!(subject = id, "cached view unavailable, falling back to indexer");
                let page = self
                    .fetch_history(namespace, id, page_offset, page_size.min(DEFAULT_PAGE_SIZE))
                    .await?;
                Ok(HistoryPage::passthrough(page))
            }
        }
    }

    // --- Build scheduling ---

    fn spawn_check_and_update(
        self: &Arc<Self>,
        namespace: Namespace,
        id: &str,
        api_num_txs: u64,
        force: bool,
    ) {
        let engine = Arc::clone(self);
        let id = id.to_owned();
        tokio::spawn(async move {
            engine.check_and_update(namespace, &id, api_num_txs, force).await;
        });
    }

    /// Decides whether a subject needs a build, and schedules one on the
    /// build queue if so. Fire-and-forget; errors are logged and reset
    /// the subject to `Unknown`.
    pub async fn check_and_update(
        self: &Arc<Self>,
        namespace: Namespace,
        id: &str,
        api_num_txs: u64,
        force: bool,
    ) {
        if api_num_txs > self.config.max_tx_limit {
            warn!(
                subject = id,
                num_txs = api_num_txs,
                limit = self.config.max_tx_limit,
                "subject over transaction limit, refusing to cache"
            );
            self.set_status(namespace, id, CacheStatus::Reject);
            return;
        }

        let key = Self::status_key(namespace, id);
        if self.update_locks.contains(&key) {
            debug!(subject = id, "build already in progress");
            return;
        }

        let meta = match self.store.read_metadata(namespace, id) {
            Ok(meta) => meta,
            Err(err) => {
                warn!(subject = id, error = %err, "metadata read failed before build check");
                None
            }
        };
        let have = meta.as_ref().map_or(0, |m| m.num_txs);
        let dynamic_page_size =
            api_num_txs.saturating_sub(have).clamp(1, u64::from(DEFAULT_PAGE_SIZE)) as u32;

        if meta.is_none() || have != api_num_txs || force {
            if !self.update_locks.insert(key.clone()) {
                debug!(subject = id, "lost build admission race");
                return;
            }
            let guard = UpdateGuard { locks: Arc::clone(&self.update_locks), key };

            let engine = Arc::clone(self);
            let id = id.to_owned();
            drop(self.build_queue.enqueue(move || async move {
                let _guard = guard;
                let result = engine
                    .failover
                    .execute_with_retry(
                        || engine.update_cache(namespace, &id, api_num_txs, dynamic_page_size),
                        "cache build",
                    )
                    .await;
                if let Err(err) = result {
                    error!(subject = %id, error = %err, "cache build failed");
                    engine.set_status(namespace, &id, CacheStatus::Unknown);
                }
            }));
        } else {
            self.set_status(namespace, id, CacheStatus::Latest);
            self.spawn_attach(namespace, id);
        }
    }

    /// The background build: pages through the indexer until the working
    /// map covers `total_num_txs`, persisting as it goes.
    ///
    /// Iteration state lives here and is rebuilt from the durable form on
    /// retry, so a crashed build redoes work but never corrupts state.
    async fn update_cache(
        self: &Arc<Self>,
        namespace: Namespace,
        id: &str,
        total_num_txs: u64,
        page_size: u32,
    ) -> Result<(), CacheError> {
        if total_num_txs > self.config.max_tx_limit {
            self.set_status(namespace, id, CacheStatus::Reject);
            return Ok(());
        }

        let mut data = self
            .store
            .read_subject(namespace, id)?
            .unwrap_or_default();
        let mut current_page = 0u32;
        let mut iteration = 0u32;

        loop {
            if data.tx_map.len() as u64 >= total_num_txs {
                sort_tx_order(&mut data.tx_order, &data.tx_map);
                self.store.write_subject(namespace, id, &data)?;
                break;
            }

            let page = match namespace {
                Namespace::Address => {
                    self.client.address_history(id, current_page, page_size).await?
                }
                Namespace::Token => self.client.token_history(id, current_page, page_size).await?,
            };

            if page.txs.is_empty() {
                warn!(
                    subject = id,
                    have = data.tx_map.len(),
                    expected = total_num_txs,
                    "indexer returned an empty page before the expected count was reached"
                );
                sort_tx_order(&mut data.tx_order, &data.tx_map);
                self.store.write_subject(namespace, id, &data)?;
                break;
            }

            for mut tx in page.txs {
                if !data.tx_map.contains_key(&tx.txid) {
                    normalize_finality(&mut tx);
                    data.tx_order.push(tx.txid.clone());
                    data.tx_map.insert(tx.txid.clone(), tx);
                }
            }
            sort_tx_order(&mut data.tx_order, &data.tx_map);

            iteration += 1;
            let throttled = data.tx_map.len() >= WRITE_THROTTLE_THRESHOLD;
            if !throttled || iteration % WRITE_THROTTLE_STRIDE == 0 {
                self.store.write_subject(namespace, id, &data)?;
            }
            current_page += 1;
        }

        if let Err(err) = self.store.clean_least_accessed(self.config.max_cache_size_bytes) {
            warn!(subject = id, error = %err, "size-ceiling enforcement failed");
        }

        // The next read must load the fresh durable view, not a stale
        // memory entry from before the build.
        self.views(namespace).invalidate(id);

        if self.recorded_status(namespace, id) != CacheStatus::Latest {
            self.set_status(namespace, id, CacheStatus::Latest);
            self.spawn_attach(namespace, id);
        }
        info!(subject = id, num_txs = data.num_txs(), "cache build complete");
        Ok(())
    }

    // --- Page serving ---

    async fn serve_from_cache(
        self: &Arc<Self>,
        namespace: Namespace,
        id: &str,
        page_offset: u32,
        page_size: u32,
    ) -> Result<Option<HistoryPage>, CacheError> {
        let views = self.views(namespace);
        let view = match views.get(id) {
            Some(view) => view,
            None => {
                let loaded = self
                    .failover
                    .handle_db_operation(
                        || async {
                            self.store
                                .read_subject(namespace, id)?
                                .ok_or_else(|| CacheError::NotFound(format!("subject {id}")))
                        },
                        "durable view read",
                    )
                    .await?;
                let Some(loaded) = loaded else {
                    return Ok(None);
                };
                let loaded = Arc::new(loaded);
                views.insert(id, Arc::clone(&loaded));
                loaded
            }
        };

        let mut tx_order = view.tx_order.clone();
        sort_tx_order(&mut tx_order, &view.tx_map);

        // Drift check: a mismatch only schedules a rebuild. The current
        // request still serves the loaded view to avoid amplifying the
        // stall.
        if rand::random::<f64>() < self.config.hash_check_probability {
            if let Some(meta) = self.store.read_metadata(namespace, id)? {
                let current_hash = hash_tx_order(&tx_order);
                if meta.data_hash != current_hash {
                    warn!(
                        subject = id,
                        expected = %meta.data_hash,
                        actual = %current_hash,
                        "content hash drift detected, scheduling rebuild"
                    );
                    views.invalidate(id);
                    self.spawn_check_and_update(namespace, id, meta.num_txs, true);
                }
            }
        }

        let num_txs = tx_order.len() as u64;
        if num_txs == 0 {
            return Ok(Some(HistoryPage::plain(Vec::new(), 0, 0)));
        }
        let num_pages = num_txs.div_ceil(u64::from(page_size)) as u32;
        let start = page_offset as usize * page_size as usize;
        if start >= tx_order.len() {
            return Err(CacheError::OutOfRange { page: page_offset, num_pages });
        }
        let end = (start + page_size as usize).min(tx_order.len());

        let slice_ids = &tx_order[start..end];
        let txs: Vec<Tx> =
            slice_ids.iter().filter_map(|txid| view.tx_map.get(txid).cloned()).collect();

        let repaired = self.repair_page(namespace, id, &txs).await?;
        let txs = if repaired {
            // Repair rewrote entries; reload the slice from the fresh
            // durable view.
            views.invalidate(id);
            let Some(fresh) = self.store.read_subject(namespace, id)? else {
                return Ok(None);
            };
            let fresh = Arc::new(fresh);
            views.insert(id, Arc::clone(&fresh));
            let mut fresh_order = fresh.tx_order.clone();
            sort_tx_order(&mut fresh_order, &fresh.tx_map);
            let end = (start + page_size as usize).min(fresh_order.len());
            if start >= fresh_order.len() {
                Vec::new()
            } else {
                fresh_order[start..end]
                    .iter()
                    .filter_map(|txid| fresh.tx_map.get(txid).cloned())
                    .collect()
            }
        } else {
            txs
        };

        Ok(Some(HistoryPage::plain(txs, num_pages, num_txs)))
    }

    // --- Repair ---

    /// Refetches every visible transaction that still lacks a block
    /// placement, on the bounded repair queue. Returns whether anything
    /// was rewritten.
    async fn repair_page(
        self: &Arc<Self>,
        namespace: Namespace,
        id: &str,
        visible: &[Tx],
    ) -> Result<bool, CacheError> {
        let candidates: Vec<String> = visible
            .iter()
            .filter(|tx| tx.is_unconfirmed())
            .map(|tx| tx.txid.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(false);
        }

        let handles: Vec<_> = candidates
            .into_iter()
            .map(|txid| {
                let engine = Arc::clone(self);
                self.repair_queue.enqueue(move || async move {
                    let result = engine
                        .failover
                        .execute_with_retry(|| engine.client.tx(&txid), "tx refetch")
                        .await;
                    (txid, result)
                })
            })
            .collect();

        let mut repaired = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((txid, Ok(tx))) => {
                    if tx.block.is_some() {
                        repaired.push(tx);
                    } else {
                        debug!(txid = %txid, "refetched tx still unconfirmed");
                    }
                }
                Ok((txid, Err(err))) => {
                    warn!(txid = %txid, error = %err, "tx refetch failed");
                }
                Err(_) => warn!("repair task canceled"),
            }
        }
        if repaired.is_empty() {
            return Ok(false);
        }

        Ok(self.apply_repairs(namespace, id, repaired)?)
    }

    /// Replaces repaired records under the update lock, resorts and
    /// persists. Skips silently when a build holds the lock, since the
    /// build will land the same facts.
    fn apply_repairs(
        &self,
        namespace: Namespace,
        id: &str,
        repaired: Vec<Tx>,
    ) -> Result<bool, CacheError> {
        let key = Self::status_key(namespace, id);
        if !self.update_locks.insert(key.clone()) {
            debug!(subject = id, "repair skipped, build in progress");
            return Ok(false);
        }
        let _guard = UpdateGuard { locks: Arc::clone(&self.update_locks), key };

        let Some(mut data) = self.store.read_subject(namespace, id)? else {
            return Ok(false);
        };
        let mut updated = false;
        for mut tx in repaired {
            if data.tx_map.contains_key(&tx.txid) {
                normalize_finality(&mut tx);
                data.tx_map.insert(tx.txid.clone(), tx);
                updated = true;
            }
        }
        if !updated {
            return Ok(false);
        }

        sort_tx_order(&mut data.tx_order, &data.tx_map);
        self.store.write_subject(namespace, id, &data)?;
        info!(subject = id, "repaired confirmed transactions persisted");
        Ok(true)
    }

    /// Refetches a single transaction after a finalization event and
    /// rewrites it in place.
    pub fn update_unconfirmed(self: &Arc<Self>, namespace: Namespace, id: &str, txid: &str) {
        let engine = Arc::clone(self);
        let id = id.to_owned();
        let txid = txid.to_owned();
        drop(self.repair_queue.enqueue(move || async move {
            let fetched = engine
                .failover
                .execute_with_retry(|| engine.client.tx(&txid), "finalized tx refetch")
                .await;
            let tx = match fetched {
                Ok(tx) => tx,
                Err(err) => {
                    warn!(txid = %txid, error = %err, "finalized tx refetch failed");
                    return;
                }
            };
            match engine.apply_repairs(namespace, &id, vec![tx]) {
                Ok(true) => engine.views(namespace).invalidate(&id),
                Ok(false) => {}
                Err(err) => {
                    error!(subject = %id, txid = %txid, error = %err, "finalization repair failed");
                    engine.set_status(namespace, &id, CacheStatus::Unknown);
                }
            }
        }));
    }

    // --- Notification wiring ---

    fn evict_callback(self: &Arc<Self>) -> SubjectCallback {
        let weak = Arc::downgrade(self);
        Arc::new(move |subject: &str, namespace: Namespace| {
            if let Some(engine) = weak.upgrade() {
                engine.handle_evicted(namespace, subject);
            }
        })
    }

    fn handle_evicted(&self, namespace: Namespace, id: &str) {
        info!(subject = id, namespace = %namespace, "subscription lost, cache demoted");
        self.set_status(namespace, id, CacheStatus::Unknown);
        self.views(namespace).invalidate(id);
    }

    /// Subscribes a subject on the notification manager, retrying through
    /// the ws envelope. Fire-and-forget.
    fn spawn_attach(self: &Arc<Self>, namespace: Namespace, id: &str) {
        let engine = Arc::clone(self);
        let id = id.to_owned();
        tokio::spawn(async move {
            let on_event: EventCallback = {
                let weak = Arc::downgrade(&engine);
                Arc::new(move |subject: &str, txid: &str, msg_type: TxMsgType| {
                    if let Some(engine) = weak.upgrade() {
                        engine.handle_tx_event(namespace, subject, txid, msg_type);
                    }
                })
            };
            let result = engine
                .failover
                .handle_ws_operation(
                    || engine.notify.attach(namespace, &id, Arc::clone(&on_event)),
                    &id,
                    "subscription attach",
                )
                .await;
            if let Err(err) = result {
                warn!(subject = %id, error = %err, "attach failed, subject stays unsubscribed");
            }
        });
    }

    /// Debounced entry point for transport events. Bursts for the same
    /// `(subject, msg_type)` coalesce into one refresh; for finalization
    /// the latest txid wins and earlier ones are recovered by page
    /// repair.
    fn handle_tx_event(
        self: &Arc<Self>,
        namespace: Namespace,
        subject: &str,
        txid: &str,
        msg_type: TxMsgType,
    ) {
        let key = (Self::status_key(namespace, subject), msg_type);
        let generation = self.debounce_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.debounce
            .insert(key.clone(), DebounceEntry { generation, txid: txid.to_owned() });

        let weak = Arc::downgrade(self);
        let subject = subject.to_owned();
        tokio::spawn(async move {
            sleep(EVENT_DEBOUNCE).await;
            let Some(engine) = weak.upgrade() else { return };

            let latest_txid = {
                let Some(entry) = engine.debounce.get(&key) else { return };
                if entry.generation != generation {
                    // A newer event supersedes this one.
                    return;
                }
                entry.txid.clone()
            };
            engine.debounce.remove_if(&key, |_, entry| entry.generation == generation);

            engine.apply_tx_event(namespace, &subject, &latest_txid, msg_type).await;
        });
    }

    async fn apply_tx_event(
        self: &Arc<Self>,
        namespace: Namespace,
        subject: &str,
        txid: &str,
        msg_type: TxMsgType,
    ) {
        debug!(subject = subject, txid = txid, msg_type = ?msg_type, "applying transport event");
        self.views(namespace).invalidate(subject);

        match msg_type {
            TxMsgType::AddedToMempool => {
                let probe = match self.fetch_history(namespace, subject, 0, 1).await {
                    Ok(probe) => probe,
                    Err(err) => {
                        warn!(subject = subject, error = %err, "event probe failed");
                        self.set_status(namespace, subject, CacheStatus::Unknown);
                        return;
                    }
                };
                self.check_and_update(namespace, subject, probe.num_txs, false).await;
            }
            TxMsgType::Finalized => {
                self.update_unconfirmed(namespace, subject, txid);
            }
        }
    }

    // --- Management ---

    /// Removes a subject entirely: durable data, metadata, memory view,
    /// recorded status and subscription.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub async fn clear_subject(&self, namespace: Namespace, id: &str) -> Result<(), CacheError> {
        self.store.clear_subject(namespace, id)?;
        self.statuses.remove(&Self::status_key(namespace, id));
        self.views(namespace).invalidate(id);
        self.notify.detach(namespace, id).await;
        Ok(())
    }

    /// Clears both namespaces and every piece of live state.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub async fn clear_all(&self) -> Result<(), CacheError> {
        self.notify.detach_all().await;
        self.store.clear_all()?;
        self.statuses.clear();
        self.address_views.clear();
        self.token_views.clear();
        Ok(())
    }

    /// Tears down sweepers, timers, queues and the dispatch loop.
    /// Idempotent.
    pub async fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("cache engine shutting down");
        let _ = self.shutdown.send(());
        self.notify.detach_all().await;
        self.notify.shutdown();
        self.build_queue.close();
        self.repair_queue.close();
        self.address_views.clear();
        self.token_views.clear();
    }
}
