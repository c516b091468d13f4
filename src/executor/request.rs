//! Request executor: cache, dedup and retry behind one `execute` call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::Instrument;

use super::cache::{ResponseCache, ResponseCacheConfig};
use super::error::{Classify, ExecError, TransportError};
use super::pending::{ErasedValue, PendingRegistry, PendingSlot, Registration};
use super::retry::{RetryConfig, RetryOutcome, RetryPolicy};
use crate::shutdown::{ShutdownCoordinator, ShutdownGuard};
use crate::telemetry::{RequestSpan, RequestStats, SpanExt, StatsSnapshot};

/// Per-call switches for [`RequestExecutor::execute`].
///
/// Only the call that starts an execution decides how it runs. Callers that
/// attach to an in-flight execution share its outcome under the starter's
/// options: if the starter passed `use_cache: false`, the shared value is
/// not cached even when an attached caller asked for caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteOptions {
    pub use_cache: bool,
    pub enable_retry: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            use_cache: true,
            enable_retry: true,
        }
    }
}

impl ExecuteOptions {
    pub fn without_cache(self) -> Self {
        Self { use_cache: false, ..self }
    }

    pub fn without_retry(self) -> Self {
        Self { enable_retry: false, ..self }
    }
}

/// Configuration for the request executor.
#[derive(Debug, Clone, Default)]
pub struct RequestExecutorConfig {
    pub cache: ResponseCacheConfig,
    pub retry: RetryConfig,
}

struct ExecutorInner<E> {
    cache: ResponseCache<ErasedValue>,
    pending: PendingRegistry<E>,
    retry: RetryPolicy,
    stats: RequestStats,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

/// Deduplicating, caching, retrying executor for keyed async operations.
///
/// Cloning is cheap and every clone shares the same cache, pending map and
/// counters. Values of any `Clone + Send + Sync` type can be executed; a key
/// is expected to always produce values of one type.
pub struct RequestExecutor<E = TransportError> {
    inner: Arc<ExecutorInner<E>>,
}

impl<E> Clone for RequestExecutor<E> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<E> RequestExecutor<E> {
    pub fn new(config: RequestExecutorConfig) -> Self {
        Self::build(config, None)
    }

    /// Create an executor that refuses new calls once `shutdown` drains.
    pub fn with_shutdown(config: RequestExecutorConfig, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self::build(config, Some(shutdown))
    }

    fn build(config: RequestExecutorConfig, shutdown: Option<Arc<ShutdownCoordinator>>) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                cache: ResponseCache::new(config.cache),
                pending: PendingRegistry::new(),
                retry: RetryPolicy::new(config.retry),
                stats: RequestStats::new(),
                shutdown,
            }),
        }
    }

    /// Fail every pending execution with [`ExecError::Cancelled`].
    ///
    /// The pending map is empty on return. Each operation task is signalled
    /// and drops its operation at the next suspension point.
    pub fn cancel_all_requests(&self) -> usize {
        let cancelled = self.inner.pending.cancel_all();
        if cancelled > 0 {
            tracing::warn!(cancelled, "cancelled pending requests");
        }
        cancelled
    }

    /// Cancel the pending execution for one key.
    pub fn cancel(&self, key: &str) -> bool {
        self.inner.pending.cancel(key)
    }

    /// Drop the cached value for `key`, if any.
    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.cache.remove(key)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.inner.pending.contains(key)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    fn admit(&self) -> Result<Option<ShutdownGuard>, ExecError<E>> {
        match &self.inner.shutdown {
            Some(coordinator) => coordinator.track().map(Some).ok_or(ExecError::ShuttingDown),
            None => Ok(None),
        }
    }
}

impl<E> RequestExecutor<E>
where
    E: Classify + Clone + fmt::Display + Send + Sync + 'static,
{
    /// Run `operation` for `key`, consulting the cache and the pending map
    /// first.
    ///
    /// A fresh cache entry is returned without touching anything else. If
    /// another call for `key` is in flight this call waits for its outcome.
    /// Otherwise the operation runs in its own task, through the retry
    /// policy when `options.enable_retry` is set, and its success is cached
    /// when `options.use_cache` is set.
    pub async fn execute<V, F, Fut>(
        &self,
        key: &str,
        operation: F,
        options: ExecuteOptions,
    ) -> Result<V, ExecError<E>>
    where
        V: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let guard = self.admit()?;
        let stats = &self.inner.stats;
        stats.record_call();

        if options.use_cache {
            if let Some(cached) = self.inner.cache.get(key) {
                return match downcast::<V>(&cached) {
                    Some(value) => {
                        stats.record_cache_hit();
                        tracing::debug!(key, "cache hit");
                        Ok(value)
                    }
                    None => {
                        stats.record_failure();
                        Err(ExecError::TypeMismatch { key: key.to_string() })
                    }
                };
            }
        }

        match self.inner.pending.register_or_attach(key) {
            Registration::Attached(outcome) => {
                stats.record_deduplicated();
                tracing::debug!(key, "joined in-flight request");
                let erased = outcome.await?;
                downcast::<V>(&erased).ok_or_else(|| ExecError::TypeMismatch { key: key.to_string() })
            }
            Registration::Registered(slot) => {
                let outcome = slot.outcome.clone();
                self.spawn_execution(key, operation, options, slot, guard);
                let erased = outcome.await?;
                downcast::<V>(&erased).ok_or_else(|| ExecError::TypeMismatch { key: key.to_string() })
            }
        }
    }

    fn spawn_execution<V, F, Fut>(
        &self,
        key: &str,
        operation: F,
        options: ExecuteOptions,
        slot: PendingSlot<E>,
        guard: Option<ShutdownGuard>,
    ) where
        V: Clone + Send + Sync + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
    {
        let PendingSlot { id, cancel, tx, .. } = slot;
        let mut cleanup = PendingCleanup {
            inner: Arc::clone(&self.inner),
            key: key.to_string(),
            id,
            settled: false,
        };
        let span = RequestSpan::new(key, options.enable_retry);
        let task_span = span.clone();

        let task = async move {
            let _guard = guard;
            let inner = Arc::clone(&cleanup.inner);
            let key = cleanup.key.clone();
            let started = Instant::now();

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ExecError::Cancelled),
                outcome = run_operation(&inner, &key, operation, options.enable_retry) => {
                    span.record("attempts", outcome.attempts);
                    outcome.result.map_err(ExecError::Operation)
                }
            };

            span.record("latency_ms", started.elapsed().as_millis() as u64);
            span.record_result(&result);

            let outcome = match result {
                Ok(value) => {
                    inner.stats.record_success();
                    let erased: ErasedValue = Arc::new(value);
                    if options.use_cache {
                        inner.cache.put(key.as_str(), Arc::clone(&erased));
                    }
                    Ok(erased)
                }
                Err(error) => {
                    inner.stats.record_failure();
                    Err(error)
                }
            };

            cleanup.settled = true;
            drop(cleanup);
            // Every waiter may have gone away; nothing to deliver then.
            let _ = tx.send(outcome);
        };

        tokio::spawn(task.instrument(task_span));
    }
}

async fn run_operation<V, E, F, Fut>(
    inner: &ExecutorInner<E>,
    key: &str,
    mut operation: F,
    enable_retry: bool,
) -> RetryOutcome<V, E>
where
    E: Classify + fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<V, E>>,
{
    if !enable_retry {
        return RetryOutcome { result: operation().await, attempts: 1 };
    }

    inner
        .retry
        .run(operation, |attempt, delay, error| {
            inner.stats.record_retry();
            tracing::warn!(
                key,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );
        })
        .await
}

fn downcast<V: Clone + 'static>(value: &ErasedValue) -> Option<V> {
    value.downcast_ref::<V>().cloned()
}

/// Removes the pending handle when the execution task ends, panics included.
/// A task that ends without settling (panic, runtime teardown) counts as a
/// failure.
struct PendingCleanup<E> {
    inner: Arc<ExecutorInner<E>>,
    key: String,
    id: u64,
    settled: bool,
}

impl<E> Drop for PendingCleanup<E> {
    fn drop(&mut self) {
        if !self.settled {
            self.inner.stats.record_failure();
            tracing::warn!(key = %self.key, "request task ended without an outcome");
        }
        self.inner.pending.complete(&self.key, self.id);
    }
}
