//! Mock subscription transport with test-controlled event injection.

use async_trait::async_trait;
use chronik_cache::{CacheError, TxMsgType, WsEvent, WsTransport};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Push transport double. Records subscribe/unsubscribe calls and lets
/// tests emit events as if the indexer sent them.
pub struct MockTransport {
    events_tx: broadcast::Sender<WsEvent>,
    subscribed_addresses: Mutex<Vec<String>>,
    subscribed_tokens: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    closed: AtomicBool,
    fail_subscribes: AtomicBool,
}

impl Default for MockTransport {
    fn default() -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            events_tx,
            subscribed_addresses: Mutex::new(Vec::new()),
            subscribed_tokens: Mutex::new(Vec::new()),
            unsubscribed: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_subscribes: AtomicBool::new(false),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a transaction event to every listener.
    pub fn emit_tx(&self, subject: &str, msg_type: TxMsgType, txid: &str) {
        let _ = self.events_tx.send(WsEvent::Tx {
            subject: subject.to_owned(),
            msg_type,
            txid: txid.to_owned(),
        });
    }

    /// Emits a reconnect, prompting listeners to re-subscribe.
    pub fn emit_reconnected(&self) {
        let _ = self.events_tx.send(WsEvent::Reconnected);
    }

    /// Makes every subsequent subscribe call fail with a transport error.
    pub fn fail_subscribes(&self, fail: bool) {
        self.fail_subscribes.store(fail, Ordering::SeqCst);
    }

    pub fn subscribed_addresses(&self) -> Vec<String> {
        self.subscribed_addresses.lock().clone()
    }

    pub fn subscribed_tokens(&self) -> Vec<String> {
        self.subscribed_tokens.lock().clone()
    }

    pub fn unsubscribed(&self) -> Vec<String> {
        self.unsubscribed.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WsTransport for MockTransport {
    async fn wait_for_open(&self) -> Result<(), CacheError> {
        Ok(())
    }

    async fn subscribe_address(&self, address: &str) -> Result<(), CacheError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("ECONNREFUSED: mock transport down".into()));
        }
        self.subscribed_addresses.lock().push(address.to_owned());
        Ok(())
    }

    async fn unsubscribe_address(&self, address: &str) -> Result<(), CacheError> {
        self.unsubscribed.lock().push(address.to_owned());
        Ok(())
    }

    async fn subscribe_token(&self, token_id: &str) -> Result<(), CacheError> {
        if self.fail_subscribes.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("ECONNREFUSED: mock transport down".into()));
        }
        self.subscribed_tokens.lock().push(token_id.to_owned());
        Ok(())
    }

    async fn unsubscribe_token(&self, token_id: &str) -> Result<(), CacheError> {
        self.unsubscribed.lock().push(token_id.to_owned());
        Ok(())
    }

    fn events(&self) -> broadcast::Receiver<WsEvent> {
        self.events_tx.subscribe()
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
