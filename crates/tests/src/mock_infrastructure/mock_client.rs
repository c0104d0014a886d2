//! Mock indexer client over in-memory per-subject histories.

use super::mock_ws::MockTransport;
use async_trait::async_trait;
use chronik_cache::{
    CacheError, ChronikClientInterface, Tx, TxHistoryPage, WsTransport,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};

/// Indexer double: per-subject newest-first histories, a shared mock
/// transport, and call counters for interaction assertions.
pub struct MockChronik {
    histories: Mutex<HashMap<String, Vec<Tx>>>,
    passthrough: Mutex<HashMap<String, Value>>,
    transport: Arc<MockTransport>,
    history_calls: AtomicU64,
    tx_calls: AtomicU64,
    fail_history: AtomicBool,
}

impl Default for MockChronik {
    fn default() -> Self {
        Self {
            histories: Mutex::new(HashMap::new()),
            passthrough: Mutex::new(HashMap::new()),
            transport: Arc::new(MockTransport::new()),
            history_calls: AtomicU64::new(0),
            tx_calls: AtomicU64::new(0),
            fail_history: AtomicBool::new(false),
        }
    }
}

impl MockChronik {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a subject's full history. The list is expected newest
    /// first, as the indexer would order it.
    pub fn set_history(&self, subject: &str, txs: Vec<Tx>) {
        self.histories.lock().insert(subject.to_owned(), txs);
    }

    /// Prepends a mempool transaction, as a new broadcast would.
    pub fn add_mempool_tx(&self, subject: &str, tx: Tx) {
        self.histories.lock().entry(subject.to_owned()).or_default().insert(0, tx);
    }

    /// Confirms a transaction in place, giving it a block placement.
    pub fn confirm_tx(&self, subject: &str, txid: &str, height: i64) {
        if let Some(txs) = self.histories.lock().get_mut(subject) {
            if let Some(tx) = txs.iter_mut().find(|tx| tx.txid == txid) {
                tx.block =
                    Some(chronik_cache::BlockMeta { height, timestamp: height * 600 });
                tx.is_final = true;
            }
        }
    }

    /// Registers a canned response for a passthrough method.
    pub fn set_passthrough(&self, method: &str, response: Value) {
        self.passthrough.lock().insert(method.to_owned(), response);
    }

    /// Makes history calls fail with a transport error until reset.
    pub fn fail_history(&self, fail: bool) {
        self.fail_history.store(fail, Ordering::SeqCst);
    }

    pub fn history_calls(&self) -> u64 {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn tx_calls(&self) -> u64 {
        self.tx_calls.load(Ordering::SeqCst)
    }

    /// The mock transport, for event injection and call assertions.
    pub fn transport(&self) -> Arc<MockTransport> {
        Arc::clone(&self.transport)
    }

    fn page(&self, subject: &str, page: u32, page_size: u32) -> TxHistoryPage {
        let histories = self.histories.lock();
        let txs = histories.get(subject).map(Vec::as_slice).unwrap_or_default();
        let num_txs = txs.len() as u64;
        let page_size = page_size.max(1);
        let num_pages = num_txs.div_ceil(u64::from(page_size)) as u32;

        let start = page as usize * page_size as usize;
        let slice = if start >= txs.len() {
            Vec::new()
        } else {
            txs[start..(start + page_size as usize).min(txs.len())].to_vec()
        };
        TxHistoryPage { txs: slice, num_pages, num_txs }
    }
}

#[async_trait]
impl ChronikClientInterface for MockChronik {
    async fn address_history(
        &self,
        address: &str,
        page: u32,
        page_size: u32,
    ) -> Result<TxHistoryPage, CacheError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("mock indexer unavailable".into()));
        }
        Ok(self.page(address, page, page_size))
    }

    async fn token_history(
        &self,
        token_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<TxHistoryPage, CacheError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_history.load(Ordering::SeqCst) {
            return Err(CacheError::Transport("mock indexer unavailable".into()));
        }
        Ok(self.page(token_id, page, page_size))
    }

    async fn tx(&self, txid: &str) -> Result<Tx, CacheError> {
        self.tx_calls.fetch_add(1, Ordering::SeqCst);
        let histories = self.histories.lock();
        histories
            .values()
            .flat_map(|txs| txs.iter())
            .find(|tx| tx.txid == txid)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("tx {txid}")))
    }

    async fn call(&self, method: &str, _params: Value) -> Result<Value, CacheError> {
        self.passthrough
            .lock()
            .get(method)
            .cloned()
            .ok_or_else(|| CacheError::NotFound(format!("method {method}")))
    }

    fn ws(&self) -> Arc<dyn WsTransport> {
        Arc::clone(&self.transport) as Arc<dyn WsTransport>
    }
}
