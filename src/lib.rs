//! reqshield
//!
//! A client-side layer that runs asynchronous, possibly failing network
//! operations on behalf of an application. It does not own the transport:
//! callers hand it an operation and get back the operation's value or error.
//!
//! # Components
//!
//! - **Request executor**: per-key deduplication of in-flight calls, a
//!   fixed-TTL response cache, and retry with exponential backoff for
//!   transient failures.
//! - **Concurrency queue**: bounds how many operations run at once across
//!   the application, queuing the rest in arrival order.
//!
//! The two share no state. [`NetworkLayer`] is the explicit creation point
//! that wires both to one shutdown coordinator.

pub mod cli;
pub mod config;
pub mod executor;
pub mod queue;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use executor::{RequestExecutor, RequestExecutorConfig, TransportError};
use queue::{ConcurrencyQueue, ConcurrencyQueueConfig};
use shutdown::{ShutdownCoordinator, ShutdownResult};

/// Layer configuration.
#[derive(Debug, Clone)]
pub struct LayerConfig {
    pub executor: RequestExecutorConfig,
    pub queue: ConcurrencyQueueConfig,
    pub shutdown_timeout: Duration,
}

impl Default for LayerConfig {
    fn default() -> Self {
        Self {
            executor: RequestExecutorConfig::default(),
            queue: ConcurrencyQueueConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// The process-wide request layer. Construct once at startup, share by
/// reference or clone the components out, and call [`NetworkLayer::shutdown`]
/// before exit.
pub struct NetworkLayer<E = TransportError> {
    pub executor: RequestExecutor<E>,
    pub queue: ConcurrencyQueue,
    shutdown: Arc<ShutdownCoordinator>,
    shutdown_timeout: Duration,
}

impl<E> NetworkLayer<E> {
    /// Create a new layer with the given configuration.
    pub fn new(config: LayerConfig) -> Self {
        let shutdown = Arc::new(ShutdownCoordinator::new());
        let executor = RequestExecutor::with_shutdown(config.executor, Arc::clone(&shutdown));
        let queue = ConcurrencyQueue::with_shutdown(config.queue, Arc::clone(&shutdown));

        Self {
            executor,
            queue,
            shutdown,
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    pub fn shutdown_coordinator(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Shut down with the configured timeout.
    pub async fn shutdown(&self) -> ShutdownResult {
        self.shutdown_with_timeout(self.shutdown_timeout).await
    }

    /// Refuse new calls, wait up to `timeout` for in-flight ones, then
    /// cancel whatever is still pending and close the queue.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> ShutdownResult {
        let result = self.shutdown.initiate(timeout).await;
        let cancelled = self.executor.cancel_all_requests();
        self.queue.close();
        tracing::info!(?result, cancelled, "request layer stopped");
        result
    }
}
