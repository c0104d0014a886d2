//! # chronik-cache
//!
//! A read-through, write-behind caching layer over a Chronik-style
//! blockchain indexer. Clients ask for pages of per-subject transaction
//! history (an address or a token id); the layer serves them from a local
//! durable store once the local view is known to be current, and
//! transparently forwards to the indexer while it builds or repairs that
//! view in the background. A live notification channel per subject keeps
//! warm caches current without polling.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ChronikCache                         │
//! │  ┌───────────────┐  ┌────────────────┐  ┌───────────────┐   │
//! │  │  CacheEngine  │  │ NotifyManager  │  │  Statistics   │   │
//! │  └───────┬───────┘  └───────┬────────┘  └───────────────┘   │
//! │          │                  │                               │
//! │  ┌───────▼───────┐  ┌───────▼────────┐  ┌───────────────┐   │
//! │  │  PageCache    │  │  WsTransport   │  │  TaskQueue ×2 │   │
//! │  │  SubjectStore │  │  (per client)  │  │ (build/repair)│   │
//! │  └───────┬───────┘  └────────────────┘  └───────────────┘   │
//! │          │                                                  │
//! │  ┌───────▼───────┐                                          │
//! │  │    KvStore    │  sled (durable) or memory (ephemeral)    │
//! │  └───────────────┘                                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Query flow
//!
//! ```text
//! history(subject, page)
//!       │
//!       ▼
//!   REJECT? ──── yes ──► indexer passthrough, status 2
//!       │ no
//!       ▼
//!   LATEST? ──── no ───► indexer passthrough, status 3
//!       │ yes              └─► background build fills the store,
//!       ▼                      then the subject goes LATEST
//!   memory view? ── miss ─► durable read, insert into memory
//!       │ hit
//!       ▼
//!   hash check (probabilistic) ── drift ─► forced rebuild scheduled
//!       │
//!       ▼
//!   slice, repair unconfirmed entries, serve
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! let kv = Arc::new(SledStore::open("./cache")?);
//! let cache = ChronikCache::new(client, kv, CacheConfig::default());
//!
//! let page = cache.address("ecash:qq…").history(0, 200).await?;
//! let token_page = cache.token_id("aabb…").history(0, 200).await?;
//!
//! cache.destroy().await;
//! ```

pub mod api;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod failover;
pub mod kv;
pub mod notify;
pub mod queue;
pub mod stats;
pub mod store;
pub mod types;

pub use api::{AddressResolver, ChronikCache, EcashResolver, SubjectHandle};
pub use client::{ChronikClientInterface, WsEvent, WsTransport};
pub use config::{CacheConfig, FailoverOptions};
pub use error::CacheError;
pub use kv::{KvStore, MemoryStore, SledStore, StoreError};
pub use stats::Statistics;
pub use types::{
    BlockMeta, CacheMetadata, CacheStatus, HistoryPage, Namespace, ResponseStatus, Tx,
    TxHistoryPage, TxMsgType,
};
