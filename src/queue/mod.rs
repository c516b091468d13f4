//! Admission control for outbound network work.
//!
//! Caps how many operations run at once across the application and queues
//! the remainder in arrival order. Independent of the request executor:
//! callers may submit executor calls through the queue or not.

mod concurrency;
mod queue_tests;

pub use concurrency::{
    ConcurrencyQueue, ConcurrencyQueueConfig, ItemState, QueueError, MAX_CONCURRENCY,
    MIN_CONCURRENCY,
};
