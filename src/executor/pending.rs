//! In-flight request registry for deduplication.
//!
//! Maps a request key to the shared outcome of the one execution currently
//! running for it. Check-and-insert goes through the DashMap entry API, so
//! two callers racing on the same key cannot both register.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use super::error::ExecError;

/// Type-erased successful value, downcast by the caller that asked for it.
pub type ErasedValue = Arc<dyn Any + Send + Sync>;

/// Outcome every waiter on a key observes.
pub type SharedOutcome<E> = Shared<BoxFuture<'static, Result<ErasedValue, ExecError<E>>>>;

/// Sender half the leader uses to publish the outcome.
pub type OutcomeTx<E> = oneshot::Sender<Result<ErasedValue, ExecError<E>>>;

struct PendingHandle<E> {
    id: u64,
    outcome: SharedOutcome<E>,
    cancel: CancellationToken,
}

/// Everything the leader of a fresh execution needs.
pub struct PendingSlot<E> {
    pub id: u64,
    pub outcome: SharedOutcome<E>,
    pub cancel: CancellationToken,
    pub tx: OutcomeTx<E>,
}

/// Result of [`PendingRegistry::register_or_attach`].
pub enum Registration<E> {
    /// Another execution is in flight; wait on its outcome.
    Attached(SharedOutcome<E>),
    /// The caller owns a new execution and must publish through `tx`.
    Registered(PendingSlot<E>),
}

/// Key to in-flight execution map.
pub struct PendingRegistry<E> {
    entries: DashMap<String, PendingHandle<E>>,
    next_id: AtomicU64,
}

impl<E> PendingRegistry<E> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Remove the handle for `key` if it still belongs to execution `id`.
    pub fn complete(&self, key: &str, id: u64) -> bool {
        self.entries.remove_if(key, |_, handle| handle.id == id).is_some()
    }

    /// Fail the execution for `key` with `Cancelled` and forget it.
    pub fn cancel(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((_, handle)) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Fail every pending execution with `Cancelled` and empty the map.
    /// Returns how many handles were cancelled.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.entries.retain(|_, handle| {
            handle.cancel.cancel();
            cancelled += 1;
            false
        });
        cancelled
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<E> PendingRegistry<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Attach to the execution running for `key`, or register a new one.
    pub fn register_or_attach(&self, key: &str) -> Registration<E> {
        if let Some(handle) = self.entries.get(key) {
            return Registration::Attached(handle.outcome.clone());
        }

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(entry) => Registration::Attached(entry.get().outcome.clone()),
            Entry::Vacant(entry) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = oneshot::channel();
                let cancel = CancellationToken::new();
                let outcome = shared_outcome(rx, cancel.clone());
                entry.insert(PendingHandle {
                    id,
                    outcome: outcome.clone(),
                    cancel: cancel.clone(),
                });
                Registration::Registered(PendingSlot { id, outcome, cancel, tx })
            }
        }
    }
}

impl<E> Default for PendingRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

fn shared_outcome<E>(
    rx: oneshot::Receiver<Result<ErasedValue, ExecError<E>>>,
    cancel: CancellationToken,
) -> SharedOutcome<E>
where
    E: Clone + Send + Sync + 'static,
{
    async move {
        tokio::select! {
            biased;
            published = rx => published.unwrap_or(Err(ExecError::Aborted)),
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
        }
    }
    .boxed()
    .shared()
}
