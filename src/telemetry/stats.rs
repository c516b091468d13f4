//! Request counters for the executor.
//!
//! Counters are monotonic within a process and purely observational.
//! Every increment is mirrored onto the `metrics` facade.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use super::metrics;

/// Point-in-time copy of the executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total: u64,
    pub deduplicated: u64,
    pub cache_hits: u64,
    pub retried: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl StatsSnapshot {
    /// Fraction of calls served from cache, 0.0 when nothing ran yet.
    pub fn cache_hit_ratio(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.cache_hits as f64 / self.total as f64
    }
}

/// Atomic request counters shared by the executor and its tasks.
#[derive(Debug, Default)]
pub struct RequestStats {
    total: AtomicU64,
    deduplicated: AtomicU64,
    cache_hits: AtomicU64,
    retried: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
}

impl RequestStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_call(&self) {
        self.total.fetch_add(1, Ordering::Relaxed);
        metrics::record_request();
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::record_cache_hit();
    }

    pub fn record_deduplicated(&self) {
        self.deduplicated.fetch_add(1, Ordering::Relaxed);
        metrics::record_deduplicated();
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
        metrics::record_retry();
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
        metrics::record_request_success();
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_request_failure();
    }

    /// Read all counters.
    ///
    /// Individual loads are relaxed; the snapshot is not a consistent cut
    /// while calls are in flight.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total: self.total.load(Ordering::Relaxed),
            deduplicated: self.deduplicated.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}
