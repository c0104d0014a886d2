//! Bounded-retry envelope for external operations.
//!
//! Every indexer, transport and durable-store call goes through
//! [`FailoverHandler`]. The envelope retries the outermost attempt only:
//! an operation that internally loops is responsible for its own
//! re-entry, the envelope never duplicates partial work.

use crate::{config::FailoverOptions, error::CacheError};
use std::future::Future;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry executor configured once and shared by the whole cache instance.
#[derive(Debug, Clone)]
pub struct FailoverHandler {
    options: FailoverOptions,
}

impl FailoverHandler {
    #[must_use]
    pub fn new(options: FailoverOptions) -> Self {
        Self { options }
    }

    /// Runs `op` up to `max_retries` times, sleeping the configured
    /// backoff between attempts. The last error surfaces after
    /// exhaustion, annotated with `context`.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's error once retries are exhausted.
    pub async fn execute_with_retry<T, F, Fut>(
        &self,
        op: F,
        context: &str,
    ) -> Result<T, CacheError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        let mut last_err = None;
        for attempt in 1..=self.options.max_retries.max(1) {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let retryable = err.is_transient() && attempt < self.options.max_retries;
                    debug!(
                        context = context,
                        attempt = attempt,
                        error = %err,
                        retryable = retryable,
                        "operation attempt failed"
                    );
                    if !retryable {
                        return Err(err);
                    }
                    last_err = Some(err);
                    sleep(self.options.delay_for_attempt(attempt)).await;
                }
            }
        }
        Err(last_err.unwrap_or_else(|| CacheError::Transport(format!("{context}: no attempts"))))
    }

    /// Retry wrapper for subscription-transport operations.
    ///
    /// Connection-refused and connection-reset failures are logged
    /// distinctly (they usually mean the indexer endpoint is down rather
    /// than a transient hiccup) and re-raised unchanged.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's error once retries are exhausted.
    pub async fn handle_ws_operation<T, F, Fut>(
        &self,
        op: F,
        subject: &str,
        context: &str,
    ) -> Result<T, CacheError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        match self.execute_with_retry(op, context).await {
            Ok(value) => Ok(value),
            Err(err) => {
                let text = err.to_string();
                if text.contains("ECONNREFUSED") || text.contains("ECONNRESET") {
                    warn!(
                        subject = subject,
                        context = context,
                        error = %err,
                        "subscription endpoint unreachable"
                    );
                } else {
                    warn!(subject = subject, context = context, error = %err, "ws operation failed");
                }
                Err(err)
            }
        }
    }

    /// Retry wrapper for durable-store operations.
    ///
    /// A `NotFound` outcome is part of normal operation and becomes
    /// `Ok(None)`; every other error is re-raised after retries.
    ///
    /// # Errors
    ///
    /// Returns the final attempt's non-`NotFound` error once retries are
    /// exhausted.
    pub async fn handle_db_operation<T, F, Fut>(
        &self,
        op: F,
        context: &str,
    ) -> Result<Option<T>, CacheError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, CacheError>>,
    {
        match self.execute_with_retry(op, context).await {
            Ok(value) => Ok(Some(value)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }
}
