//! Live subscription management.
//!
//! Keeps two capped, insertion-ordered subscription sets (addresses and
//! tokens) against the indexer's push transport, dispatches transaction
//! events to per-subject callbacks, and reclaims idle subscriptions
//! through extendable expiry timers.
//!
//! Callbacks never propagate failures to the transport: a panicking
//! handler is caught and logged, and the dispatch loop keeps running.

use crate::{
    client::{WsEvent, WsTransport},
    error::CacheError,
    types::{Namespace, TxMsgType},
};
use parking_lot::Mutex as SyncMutex;
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::Duration,
};
use tokio::{
    sync::{broadcast, Mutex},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tracing::{debug, error, info, warn};

/// Per-subject transaction event handler: `(subject, txid, msg_type)`.
pub type EventCallback = Arc<dyn Fn(&str, &str, TxMsgType) + Send + Sync>;

/// Invoked when a subject leaves the set without being asked to
/// (capacity eviction, timer expiry, failed reconnect).
pub type SubjectCallback = Arc<dyn Fn(&str, Namespace) + Send + Sync>;

/// Longest single timer sleep. Expiries further out are re-armed on each
/// firing-less tick.
const MAX_TIMER_SLEEP: Duration = Duration::from_secs(15 * 24 * 60 * 60);

/// Window a reconnecting transport gets to accept re-subscriptions
/// before affected subjects are treated as evicted.
const RESUBSCRIBE_WINDOW: Duration = Duration::from_secs(5);

/// Timer status report for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemainingTime {
    pub active: bool,
    pub remaining_secs: Option<u64>,
    pub message: Option<String>,
}

impl RemainingTime {
    fn inactive(message: &str) -> Self {
        Self { active: false, remaining_secs: None, message: Some(message.to_owned()) }
    }
}

struct SubscriptionTimer {
    expiry: Arc<SyncMutex<Instant>>,
    task: JoinHandle<()>,
}

struct Subscription {
    subject: String,
    on_event: EventCallback,
    timer: Option<SubscriptionTimer>,
}

/// Subscription registry over one shared push transport.
pub struct NotifyManager {
    transport: Arc<dyn WsTransport>,
    max_subscriptions: usize,
    ws_timeout: Duration,
    ws_extend_timeout: Duration,
    addresses: Mutex<Vec<Subscription>>,
    tokens: Mutex<Vec<Subscription>>,
    on_evict: SubjectCallback,
    shutdown: broadcast::Sender<()>,
    dispatch_started: AtomicBool,
}

impl NotifyManager {
    /// Creates a manager. `on_evict` fires exactly once per involuntary
    /// removal (capacity, expiry, failed reconnect).
    #[must_use]
    pub fn new(
        transport: Arc<dyn WsTransport>,
        max_subscriptions: usize,
        ws_timeout: Duration,
        ws_extend_timeout: Duration,
        on_evict: SubjectCallback,
    ) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            transport,
            max_subscriptions,
            ws_timeout,
            ws_extend_timeout,
            addresses: Mutex::new(Vec::new()),
            tokens: Mutex::new(Vec::new()),
            on_evict,
            shutdown,
            dispatch_started: AtomicBool::new(false),
        }
    }

    fn set(&self, namespace: Namespace) -> &Mutex<Vec<Subscription>> {
        match namespace {
            Namespace::Address => &self.addresses,
            Namespace::Token => &self.tokens,
        }
    }

    async fn subscribe_transport(
        &self,
        namespace: Namespace,
        subject: &str,
    ) -> Result<(), CacheError> {
        match namespace {
            Namespace::Address => self.transport.subscribe_address(subject).await,
            Namespace::Token => self.transport.subscribe_token(subject).await,
        }
    }

    async fn unsubscribe_transport(&self, namespace: Namespace, subject: &str) {
        let result = match namespace {
            Namespace::Address => self.transport.unsubscribe_address(subject).await,
            Namespace::Token => self.transport.unsubscribe_token(subject).await,
        };
        if let Err(err) = result {
            warn!(subject = subject, namespace = %namespace, error = %err, "unsubscribe failed");
        }
    }

    /// Starts the event dispatch loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.dispatch_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let manager = Arc::downgrade(self);
        let mut events = self.transport.events();
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => event,
                };
                let Some(manager) = manager.upgrade() else { break };
                match event {
                    Ok(WsEvent::Tx { subject, msg_type, txid }) => {
                        manager.dispatch_tx(&subject, &txid, msg_type).await;
                    }
                    Ok(WsEvent::Reconnected) => {
                        info!("transport reconnected, re-establishing subscriptions");
                        manager.resubscribe_all().await;
                    }
                    Ok(WsEvent::Open) => debug!("transport open"),
                    Ok(WsEvent::Error(message)) => warn!(error = %message, "transport error"),
                    Ok(WsEvent::End) => {
                        warn!("transport ended, dispatch loop exiting");
                        break;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "event dispatch lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("event dispatch loop stopped");
        });
    }

    async fn dispatch_tx(&self, subject: &str, txid: &str, msg_type: TxMsgType) {
        for namespace in [Namespace::Address, Namespace::Token] {
            let subs = self.set(namespace).lock().await;
            for sub in subs.iter().filter(|s| s.subject == subject) {
                let callback = Arc::clone(&sub.on_event);
                // A broken handler must never take the transport down.
                if let Err(panic) =
                    catch_unwind(AssertUnwindSafe(|| callback(subject, txid, msg_type)))
                {
                    error!(
                        subject = subject,
                        txid = txid,
                        panic = ?panic,
                        "event callback panicked"
                    );
                }
            }
        }
    }

    async fn resubscribe_all(self: &Arc<Self>) {
        for namespace in [Namespace::Address, Namespace::Token] {
            let subjects: Vec<String> = {
                let subs = self.set(namespace).lock().await;
                subs.iter().map(|s| s.subject.clone()).collect()
            };

            for subject in subjects {
                let attempt =
                    timeout(RESUBSCRIBE_WINDOW, self.subscribe_transport(namespace, &subject))
                        .await;
                match attempt {
                    Ok(Ok(())) => {
                        debug!(subject = %subject, namespace = %namespace, "re-subscribed");
                    }
                    Ok(Err(err)) => {
                        warn!(
                            subject = %subject,
                            namespace = %namespace,
                            error = %err,
                            "re-subscribe failed, dropping subscription"
                        );
                        self.remove_and_evict(namespace, &subject).await;
                    }
                    Err(_) => {
                        warn!(
                            subject = %subject,
                            namespace = %namespace,
                            "re-subscribe timed out, dropping subscription"
                        );
                        self.remove_and_evict(namespace, &subject).await;
                    }
                }
            }
        }
    }

    async fn remove_and_evict(&self, namespace: Namespace, subject: &str) {
        let removed = {
            let mut subs = self.set(namespace).lock().await;
            subs.iter().position(|s| s.subject == subject).map(|at| subs.remove(at))
        };
        if let Some(sub) = removed {
            if let Some(timer) = sub.timer {
                timer.task.abort();
            }
            (self.on_evict)(subject, namespace);
        }
    }

    /// Attaches a subject. Idempotent; at capacity the oldest entry is
    /// evicted FIFO with exactly one `on_evict` invocation.
    ///
    /// # Errors
    ///
    /// Returns the transport's subscribe error; the set is unchanged in
    /// that case (minus any eviction already performed).
    pub async fn attach(
        &self,
        namespace: Namespace,
        subject: &str,
        on_event: EventCallback,
    ) -> Result<(), CacheError> {
        let mut subs = self.set(namespace).lock().await;
        if subs.iter().any(|s| s.subject == subject) {
            debug!(subject = subject, namespace = %namespace, "already subscribed");
            return Ok(());
        }

        if subs.len() >= self.max_subscriptions {
            let oldest = subs.remove(0);
            info!(
                evicted = %oldest.subject,
                namespace = %namespace,
                "subscription set full, evicting oldest"
            );
            if let Some(timer) = oldest.timer {
                timer.task.abort();
            }
            self.unsubscribe_transport(namespace, &oldest.subject).await;
            (self.on_evict)(&oldest.subject, namespace);
        }

        self.subscribe_transport(namespace, subject).await?;
        subs.push(Subscription { subject: subject.to_owned(), on_event, timer: None });
        info!(subject = subject, namespace = %namespace, total = subs.len(), "subscribed");
        Ok(())
    }

    /// Detaches a subject: unsubscribes, cancels any pending timer,
    /// removes it from the set. Closes the transport when nothing is left
    /// subscribed on it.
    pub async fn detach(&self, namespace: Namespace, subject: &str) {
        let removed = {
            let mut subs = self.set(namespace).lock().await;
            subs.iter().position(|s| s.subject == subject).map(|at| subs.remove(at))
        };
        let Some(sub) = removed else {
            debug!(subject = subject, namespace = %namespace, "detach of unknown subject");
            return;
        };
        if let Some(timer) = sub.timer {
            timer.task.abort();
        }
        self.unsubscribe_transport(namespace, subject).await;
        info!(subject = subject, namespace = %namespace, "unsubscribed");

        self.close_transport_if_idle().await;
    }

    /// Detaches every subject in both namespaces.
    pub async fn detach_all(&self) {
        for namespace in [Namespace::Address, Namespace::Token] {
            let subjects: Vec<String> = {
                let subs = self.set(namespace).lock().await;
                subs.iter().map(|s| s.subject.clone()).collect()
            };
            for subject in subjects {
                self.detach(namespace, &subject).await;
            }
        }
    }

    /// Both namespaces share one transport here, so it closes only once
    /// neither holds a subscription.
    async fn close_transport_if_idle(&self) {
        let idle = self.addresses.lock().await.is_empty() && self.tokens.lock().await.is_empty();
        if idle {
            if let Err(err) = self.transport.close().await {
                warn!(error = %err, "transport close failed");
            } else {
                debug!("transport closed, no remaining subscriptions");
            }
        }
    }

    /// Arms or extends a subject's expiry timer.
    ///
    /// The first call sets expiry to `now + ws_timeout`; each subsequent
    /// call pushes the previous expiry out by `ws_extend_timeout`. When
    /// the timer fires, the subject is detached and `on_expire` runs.
    pub async fn reset_timer(
        self: &Arc<Self>,
        namespace: Namespace,
        subject: &str,
        on_expire: SubjectCallback,
    ) {
        let mut subs = self.set(namespace).lock().await;
        let Some(sub) = subs.iter_mut().find(|s| s.subject == subject) else {
            debug!(subject = subject, namespace = %namespace, "reset_timer without subscription");
            return;
        };

        match &sub.timer {
            Some(timer) => {
                let mut expiry = timer.expiry.lock();
                *expiry += self.ws_extend_timeout;
                debug!(
                    subject = subject,
                    namespace = %namespace,
                    remaining_secs = expiry.saturating_duration_since(Instant::now()).as_secs(),
                    "subscription timer extended"
                );
            }
            None => {
                let expiry = Arc::new(SyncMutex::new(Instant::now() + self.ws_timeout));
                let task = self.spawn_timer(
                    namespace,
                    subject.to_owned(),
                    Arc::clone(&expiry),
                    on_expire,
                );
                sub.timer = Some(SubscriptionTimer { expiry, task });
                debug!(
                    subject = subject,
                    namespace = %namespace,
                    timeout_secs = self.ws_timeout.as_secs(),
                    "subscription timer armed"
                );
            }
        }
    }

    fn spawn_timer(
        self: &Arc<Self>,
        namespace: Namespace,
        subject: String,
        expiry: Arc<SyncMutex<Instant>>,
        on_expire: SubjectCallback,
    ) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown.subscribe();

        tokio::spawn(async move {
            loop {
                let target = *expiry.lock();
                let now = Instant::now();
                if target <= now {
                    break;
                }
                let nap = (target - now).min(MAX_TIMER_SLEEP);
                tokio::select! {
                    _ = shutdown_rx.recv() => return,
                    () = sleep(nap) => {}
                }
                // Re-read the expiry: a reset while we slept re-arms the
                // timer instead of firing it.
            }

            let Some(manager) = manager.upgrade() else { return };
            info!(subject = %subject, namespace = %namespace, "subscription expired");
            manager.detach(namespace, &subject).await;
            on_expire(&subject, namespace);
        })
    }

    /// Reports whether a subject's timer is live and how long remains.
    pub async fn remaining_time(&self, namespace: Namespace, subject: &str) -> RemainingTime {
        let subs = self.set(namespace).lock().await;
        let Some(sub) = subs.iter().find(|s| s.subject == subject) else {
            return RemainingTime::inactive("no subscription");
        };
        match &sub.timer {
            Some(timer) => {
                let remaining = timer.expiry.lock().saturating_duration_since(Instant::now());
                RemainingTime {
                    active: true,
                    remaining_secs: Some(remaining.as_secs()),
                    message: None,
                }
            }
            None => RemainingTime::inactive("no timer armed"),
        }
    }

    /// Current subscription counts `(addresses, tokens)`.
    pub async fn subscription_counts(&self) -> (usize, usize) {
        (self.addresses.lock().await.len(), self.tokens.lock().await.len())
    }

    /// Returns `true` if the subject is currently subscribed.
    pub async fn is_attached(&self, namespace: Namespace, subject: &str) -> bool {
        self.set(namespace).lock().await.iter().any(|s| s.subject == subject)
    }

    /// Stops timers and the dispatch loop. Does not detach; callers that
    /// want a clean transport call [`Self::detach_all`] first.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }
}
