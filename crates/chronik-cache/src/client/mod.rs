//! The indexer capability set the cache consumes.
//!
//! Rather than sniffing methods off a concrete client, the cache is
//! generic over [`ChronikClientInterface`], an explicit capability set:
//! paged history per address/token, single-transaction lookup, a generic
//! method dispatcher for passthrough, and a subscription transport.
//! Any indexer client (or test mock) that implements it plugs in.

use crate::{
    error::CacheError,
    types::{Tx, TxHistoryPage, TxMsgType},
};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Events delivered by the subscription transport.
#[derive(Debug, Clone)]
pub enum WsEvent {
    /// The transport (re-)established its connection for the first time.
    Open,
    /// The transport dropped and reconnected; subscriptions must be
    /// re-established by the listener.
    Reconnected,
    /// A transaction event for one of the subscribed subjects.
    Tx { subject: String, msg_type: TxMsgType, txid: String },
    /// Transport-level error. Informational; the transport keeps running
    /// or emits `End`.
    Error(String),
    /// The transport is gone and will emit nothing further.
    End,
}

/// Long-lived push transport for transaction events.
///
/// One transport instance serves one namespace (addresses or tokens);
/// implementations may multiplex both over a single socket as long as
/// events carry the right subject.
#[async_trait]
pub trait WsTransport: Send + Sync {
    /// Blocks until the underlying connection is usable.
    async fn wait_for_open(&self) -> Result<(), CacheError>;

    async fn subscribe_address(&self, address: &str) -> Result<(), CacheError>;
    async fn unsubscribe_address(&self, address: &str) -> Result<(), CacheError>;
    async fn subscribe_token(&self, token_id: &str) -> Result<(), CacheError>;
    async fn unsubscribe_token(&self, token_id: &str) -> Result<(), CacheError>;

    /// Subscribes to the event stream. Every receiver sees every event.
    fn events(&self) -> broadcast::Receiver<WsEvent>;

    /// Closes the transport. Idempotent.
    async fn close(&self) -> Result<(), CacheError>;
}

/// The indexer client surface the cache is built over.
#[async_trait]
pub trait ChronikClientInterface: Send + Sync + 'static {
    /// One page of confirmed-and-mempool history for an address, newest
    /// first as the indexer orders it.
    async fn address_history(
        &self,
        address: &str,
        page: u32,
        page_size: u32,
    ) -> Result<TxHistoryPage, CacheError>;

    /// One page of history for a token id.
    async fn token_history(
        &self,
        token_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<TxHistoryPage, CacheError>;

    /// Full record for a single transaction.
    async fn tx(&self, txid: &str) -> Result<Tx, CacheError>;

    /// Generic dispatcher for every other indexer method, keyed by name.
    /// Used by the facade's passthrough.
    async fn call(&self, method: &str, params: Value) -> Result<Value, CacheError>;

    /// The subscription transport shared by this client.
    fn ws(&self) -> Arc<dyn WsTransport>;
}
