//! Graceful shutdown coordination.
//!
//! The executor and the concurrency queue each hold a guard for every call
//! they are serving. Shutdown flips the coordinator to `Draining` (new calls
//! are refused), waits for outstanding guards, then reports whether the
//! drain finished in time.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

/// Tracks in-flight calls and gates admission during shutdown.
pub struct ShutdownCoordinator {
    state: RwLock<ShutdownState>,
    in_flight: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ShutdownState::Running),
            in_flight: Arc::new(AtomicU32::new(0)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn state(&self) -> ShutdownState {
        *self.state.read()
    }

    /// Check if accepting new calls.
    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Track an in-flight call. Returns None once shutdown has begun.
    pub fn track(&self) -> Option<ShutdownGuard> {
        // Hold the read lock so a concurrent `begin_drain` cannot slip
        // between the state check and the increment.
        let state = self.state.read();
        if *state != ShutdownState::Running {
            return None;
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(ShutdownGuard {
            counter: Arc::clone(&self.in_flight),
            notify: Arc::clone(&self.notify),
        })
    }

    pub fn in_flight_count(&self) -> u32 {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop admitting new calls without waiting.
    pub fn begin_drain(&self) {
        let mut state = self.state.write();
        if *state == ShutdownState::Running {
            *state = ShutdownState::Draining;
        }
    }

    /// Initiate shutdown: stop accepting, wait for drain, mark stopped.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.begin_drain();
        tracing::info!(in_flight = self.in_flight_count(), "draining in-flight calls");

        let result = self.wait_for_drain(timeout).await;

        *self.state.write() = ShutdownState::Stopped;
        match &result {
            ShutdownResult::Complete => tracing::info!("drain complete"),
            ShutdownResult::Timeout { remaining } => {
                tracing::warn!(remaining, "drain timed out")
            }
        }
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking the count so a guard dropped
            // in between still wakes us.
            let notified = self.notify.notified();
            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            tokio::select! {
                _ = notified => continue,
                _ = tokio::time::sleep_until(deadline) => {
                    let final_count = self.in_flight_count();
                    if final_count == 0 {
                        return ShutdownResult::Complete;
                    }
                    return ShutdownResult::Timeout { remaining: final_count };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for in-flight call tracking.
pub struct ShutdownGuard {
    counter: Arc<AtomicU32>,
    notify: Arc<Notify>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
        self.notify.notify_waiters();
    }
}
