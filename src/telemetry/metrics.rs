//! `metrics` facade integration.
//!
//! Without an installed recorder every call here is a no-op, so library
//! users opt in by installing their own exporter.

use metrics::{counter, gauge};

pub const REQUESTS_TOTAL: &str = "reqshield_requests_total";
pub const CACHE_HITS_TOTAL: &str = "reqshield_cache_hits_total";
pub const DEDUPLICATED_TOTAL: &str = "reqshield_deduplicated_total";
pub const RETRIES_TOTAL: &str = "reqshield_retries_total";
pub const REQUESTS_SUCCEEDED: &str = "reqshield_requests_succeeded_total";
pub const REQUESTS_FAILED: &str = "reqshield_requests_failed_total";
pub const QUEUE_RUNNING: &str = "reqshield_queue_running";
pub const QUEUE_WAITING: &str = "reqshield_queue_waiting";

pub fn record_request() {
    counter!(REQUESTS_TOTAL).increment(1);
}

pub fn record_cache_hit() {
    counter!(CACHE_HITS_TOTAL).increment(1);
}

pub fn record_deduplicated() {
    counter!(DEDUPLICATED_TOTAL).increment(1);
}

pub fn record_retry() {
    counter!(RETRIES_TOTAL).increment(1);
}

pub fn record_request_success() {
    counter!(REQUESTS_SUCCEEDED).increment(1);
}

pub fn record_request_failure() {
    counter!(REQUESTS_FAILED).increment(1);
}

/// Publish the queue's current occupancy.
pub fn record_queue_depth(running: usize, waiting: usize) {
    gauge!(QUEUE_RUNNING).set(running as f64);
    gauge!(QUEUE_WAITING).set(waiting as f64);
}
