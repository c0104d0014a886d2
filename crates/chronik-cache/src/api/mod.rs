//! Public facade.
//!
//! [`ChronikCache`] wraps an indexer client with the caching layer and
//! exposes the same fluent query shape the client has: `address(id)`,
//! `script(type, hash)` and `token_id(id)` each return a handle with a
//! `history` method. Methods the cache does not accelerate pass through
//! the client's generic dispatcher untouched, tagged as passthrough when
//! the response is an object.

use crate::{
    cache::engine::CacheEngine,
    client::ChronikClientInterface,
    config::CacheConfig,
    error::CacheError,
    kv::KvStore,
    stats::{self, Statistics},
    types::{CacheStatus, HistoryPage, Namespace, ResponseStatus},
};
use serde_json::Value;
use std::sync::Arc;

/// Maps a script to an address id. Address encoding is environment
/// specific, so it is a seam: the default implementation formats under
/// the `ecash` prefix, and embeddings with a real codec plug their own
/// in.
pub trait AddressResolver: Send + Sync {
    /// Resolves `(script_type, script_hash)` to an address id. The hash
    /// arrives already lowercased.
    ///
    /// # Errors
    ///
    /// Implementations reject hashes they cannot encode.
    fn script_to_address(&self, script_type: &str, script_hash: &str)
        -> Result<String, CacheError>;
}

/// Default resolver: validates the hash is hex and formats the script
/// under the `ecash` prefix.
#[derive(Debug, Default, Clone, Copy)]
pub struct EcashResolver;

impl AddressResolver for EcashResolver {
    fn script_to_address(
        &self,
        script_type: &str,
        script_hash: &str,
    ) -> Result<String, CacheError> {
        if script_hash.is_empty() || !script_hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CacheError::InternalInvariant(format!(
                "script hash is not hex: {script_hash}"
            )));
        }
        Ok(format!("ecash:{script_type}:{script_hash}"))
    }
}

/// Fluent handle for one subject's queries.
pub struct SubjectHandle<'a, C: ChronikClientInterface> {
    engine: &'a Arc<CacheEngine<C>>,
    namespace: Namespace,
    id: String,
}

impl<C: ChronikClientInterface> SubjectHandle<'_, C> {
    /// One page of history, newest first. Callers conventionally start at
    /// `(0, 200)`; 200 is also the largest page the indexer serves.
    ///
    /// # Errors
    ///
    /// Surfaces indexer errors after retries and `CacheError::OutOfRange`
    /// for a page past the cached end.
    pub async fn history(
        &self,
        page_offset: u32,
        page_size: u32,
    ) -> Result<HistoryPage, CacheError> {
        self.engine.history(self.namespace, &self.id, page_offset, page_size).await
    }

    /// The subject id this handle queries.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }
}

/// The caching layer around an indexer client.
pub struct ChronikCache<C: ChronikClientInterface> {
    engine: Arc<CacheEngine<C>>,
    client: Arc<C>,
    resolver: Arc<dyn AddressResolver>,
}

impl<C: ChronikClientInterface> ChronikCache<C> {
    /// Wraps `client` with caching over the given store.
    #[must_use]
    pub fn new(client: C, kv: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self::with_resolver(client, kv, config, Arc::new(EcashResolver))
    }

    /// Same as [`Self::new`] with a custom script-to-address resolver.
    #[must_use]
    pub fn with_resolver(
        client: C,
        kv: Arc<dyn KvStore>,
        config: CacheConfig,
        resolver: Arc<dyn AddressResolver>,
    ) -> Self {
        let client = Arc::new(client);
        let engine = CacheEngine::new(Arc::clone(&client), kv, config);
        Self { engine, client, resolver }
    }

    /// Query handle for an address subject.
    #[must_use]
    pub fn address(&self, id: &str) -> SubjectHandle<'_, C> {
        SubjectHandle { engine: &self.engine, namespace: Namespace::Address, id: id.to_owned() }
    }

    /// Query handle for a script, resolved to its address. The hash is
    /// normalized to lowercase before resolution; thereafter the subject
    /// is indistinguishable from an address.
    ///
    /// # Errors
    ///
    /// Returns the resolver's error for an unencodable script.
    pub fn script(
        &self,
        script_type: &str,
        script_hash: &str,
    ) -> Result<SubjectHandle<'_, C>, CacheError> {
        let address =
            self.resolver.script_to_address(script_type, &script_hash.to_lowercase())?;
        Ok(SubjectHandle { engine: &self.engine, namespace: Namespace::Address, id: address })
    }

    /// Query handle for a token subject.
    #[must_use]
    pub fn token_id(&self, id: &str) -> SubjectHandle<'_, C> {
        SubjectHandle { engine: &self.engine, namespace: Namespace::Token, id: id.to_owned() }
    }

    /// Forwards an uncached indexer method by name. Object responses are
    /// tagged as passthrough so callers can tell them from cache hits.
    ///
    /// # Errors
    ///
    /// Surfaces the client's error unchanged.
    pub async fn pass_through(&self, method: &str, params: Value) -> Result<Value, CacheError> {
        let mut response = self.client.call(method, params).await?;
        if let Value::Object(obj) = &mut response {
            obj.insert("status".to_owned(), Value::from(u8::from(ResponseStatus::Passthrough)));
        }
        Ok(response)
    }

    /// The wrapped client, for direct typed access to uncached methods.
    #[must_use]
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Drops an address subject from the cache.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub async fn clear_address_cache(&self, id: &str) -> Result<(), CacheError> {
        self.engine.clear_subject(Namespace::Address, id).await
    }

    /// Drops a token subject from the cache.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub async fn clear_token_cache(&self, id: &str) -> Result<(), CacheError> {
        self.engine.clear_subject(Namespace::Token, id).await
    }

    /// Drops everything.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` on backend failure.
    pub async fn clear_all_cache(&self) -> Result<(), CacheError> {
        self.engine.clear_all().await
    }

    /// The derived state of a subject.
    #[must_use]
    pub fn cache_status(&self, id: &str, is_token: bool) -> CacheStatus {
        let namespace = if is_token { Namespace::Token } else { Namespace::Address };
        self.engine.cache_status(namespace, id)
    }

    /// Full statistics report over durable layout and live state.
    ///
    /// # Errors
    ///
    /// Returns `CacheError::Store` when the durable scan fails.
    pub async fn statistics(&self) -> Result<Statistics, CacheError> {
        stats::collect(&self.engine).await
    }

    /// Tears down sweepers, timers and subscriptions. Idempotent; the
    /// instance rejects queries afterwards.
    pub async fn destroy(&self) {
        self.engine.destroy().await;
    }
}
