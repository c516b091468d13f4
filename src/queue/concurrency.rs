//! Bounded admission queue for async operations.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::Instrument;

use crate::shutdown::{ShutdownCoordinator, ShutdownGuard};
use crate::telemetry::{metrics, RequestSpan};

/// Lowest accepted concurrency limit.
pub const MIN_CONCURRENCY: usize = 1;
/// Highest accepted concurrency limit.
pub const MAX_CONCURRENCY: usize = 20;

/// Configuration for the concurrency queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConcurrencyQueueConfig {
    /// Operations allowed to run at once, clamped to [1, 20].
    pub max_concurrency: usize,
    /// Cap on operations waiting for a slot. `None` leaves it unbounded.
    pub max_waiting: Option<usize>,
}

impl Default for ConcurrencyQueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 3,
            max_waiting: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError<E> {
    #[error("{0}")]
    Operation(E),

    #[error("Concurrency queue full: {waiting}/{max} waiting")]
    QueueFull { waiting: usize, max: usize },

    #[error("Concurrency queue is closed")]
    Closed,
}

impl<E> QueueError<E> {
    /// Take the operation error, if this failure came from the operation.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }
}

/// Lifecycle of one submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ItemState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Slot>,
}

struct QueueState {
    running: usize,
    max_concurrency: usize,
    waiting: VecDeque<Waiter>,
    closed: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    max_waiting: Option<usize>,
    next_id: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    shutdown: Option<Arc<ShutdownCoordinator>>,
}

/// Runs at most `max_concurrency` operations at once; the rest wait in
/// arrival order. No deduplication, no priorities.
#[derive(Clone)]
pub struct ConcurrencyQueue {
    inner: Arc<QueueInner>,
}

impl ConcurrencyQueue {
    pub fn new(config: ConcurrencyQueueConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a queue that refuses submissions once `shutdown` drains.
    pub fn with_shutdown(config: ConcurrencyQueueConfig, shutdown: Arc<ShutdownCoordinator>) -> Self {
        Self::build(config, Some(shutdown))
    }

    fn build(config: ConcurrencyQueueConfig, shutdown: Option<Arc<ShutdownCoordinator>>) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState {
                    running: 0,
                    max_concurrency: clamp_concurrency(config.max_concurrency),
                    waiting: VecDeque::new(),
                    closed: false,
                }),
                max_waiting: config.max_waiting,
                next_id: AtomicU64::new(1),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    /// Run `operation` once a slot is free and return its result.
    ///
    /// The operation's error comes back as [`QueueError::Operation`].
    /// Dropping the returned future while queued gives up the place in line.
    pub async fn enqueue<T, E, F, Fut>(&self, operation: F) -> Result<T, QueueError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let _guard = self.admit::<E>()?;
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let span = RequestSpan::queued(id);

        let outcome: Result<T, QueueError<E>> = async {
            let enqueued_at = Instant::now();
            span.record("state", ItemState::Queued.as_str());
            let slot = self.acquire::<E>(id).await?;
            span.record("wait_ms", enqueued_at.elapsed().as_millis() as u64);
            span.record("state", ItemState::Running.as_str());

            let result = operation().await;
            let state = if result.is_ok() {
                self.inner.completed.fetch_add(1, Ordering::Relaxed);
                ItemState::Completed
            } else {
                self.inner.failed.fetch_add(1, Ordering::Relaxed);
                ItemState::Failed
            };
            span.record("state", state.as_str());
            drop(slot);

            result.map_err(QueueError::Operation)
        }
        .instrument(span.clone())
        .await;
        outcome
    }

    /// Change the concurrency limit (clamped to [1, 20]) and admit waiting
    /// operations into any newly available slots. Returns the applied limit.
    pub fn set_max_concurrency(&self, limit: usize) -> usize {
        let applied = clamp_concurrency(limit);
        let mut state = self.inner.state.lock();
        state.max_concurrency = applied;
        admit_waiting(&self.inner, &mut state);
        tracing::debug!(max_concurrency = applied, running = state.running, "concurrency limit changed");
        applied
    }

    /// Refuse new submissions and fail everything still waiting with
    /// [`QueueError::Closed`]. Running operations finish normally.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        state.closed = true;
        let dropped = state.waiting.len();
        state.waiting.clear();
        metrics::record_queue_depth(state.running, 0);
        if dropped > 0 {
            tracing::warn!(dropped, "closed queue with waiting operations");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.state.lock().max_concurrency
    }

    pub fn running(&self) -> usize {
        self.inner.state.lock().running
    }

    /// Operations still waiting for a slot. Abandoned waiters are not counted.
    pub fn waiting(&self) -> usize {
        let mut state = self.inner.state.lock();
        prune_abandoned(&mut state);
        state.waiting.len()
    }

    /// Operations that settled with `Ok`.
    pub fn completed(&self) -> u64 {
        self.inner.completed.load(Ordering::Relaxed)
    }

    /// Operations that settled with `Err`.
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    fn admit<E>(&self) -> Result<Option<ShutdownGuard>, QueueError<E>> {
        match &self.inner.shutdown {
            Some(coordinator) => coordinator.track().map(Some).ok_or(QueueError::Closed),
            None => Ok(None),
        }
    }

    async fn acquire<E>(&self, id: u64) -> Result<Slot, QueueError<E>> {
        let rx = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(QueueError::Closed);
            }
            if state.running < state.max_concurrency {
                state.running += 1;
                metrics::record_queue_depth(state.running, state.waiting.len());
                return Ok(Slot::new(Arc::clone(&self.inner)));
            }
            if let Some(max) = self.inner.max_waiting {
                prune_abandoned(&mut state);
                if state.waiting.len() >= max {
                    return Err(QueueError::QueueFull {
                        waiting: state.waiting.len(),
                        max,
                    });
                }
            }

            let (tx, rx) = oneshot::channel();
            state.waiting.push_back(Waiter { id, tx });
            metrics::record_queue_depth(state.running, state.waiting.len());
            tracing::debug!(item_id = id, position = state.waiting.len() - 1, "operation queued");
            rx
        };

        rx.await.map_err(|_| QueueError::Closed)
    }
}

fn clamp_concurrency(limit: usize) -> usize {
    limit.clamp(MIN_CONCURRENCY, MAX_CONCURRENCY)
}

/// Drop waiters whose `enqueue` future has gone away.
fn prune_abandoned(state: &mut QueueState) {
    state.waiting.retain(|waiter| !waiter.tx.is_closed());
}

/// Hand free slots to waiters at the head of the line until none remain.
fn admit_waiting(inner: &Arc<QueueInner>, state: &mut QueueState) {
    while state.running < state.max_concurrency {
        let Some(waiter) = state.waiting.pop_front() else {
            break;
        };
        state.running += 1;
        if let Err(mut slot) = waiter.tx.send(Slot::new(Arc::clone(inner))) {
            // Waiter gave up; the slot never left this lock scope.
            slot.disarm();
            state.running -= 1;
            tracing::debug!(item_id = waiter.id, "skipped abandoned waiter");
        }
    }
    metrics::record_queue_depth(state.running, state.waiting.len());
}

/// One execution slot. Dropping it frees the slot and admits the next
/// waiting operations.
struct Slot {
    inner: Option<Arc<QueueInner>>,
}

impl Slot {
    fn new(inner: Arc<QueueInner>) -> Self {
        Self { inner: Some(inner) }
    }

    fn disarm(&mut self) {
        self.inner = None;
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            let mut state = inner.state.lock();
            state.running = state.running.saturating_sub(1);
            admit_waiting(&inner, &mut state);
        }
    }
}
