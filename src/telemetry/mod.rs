//! Telemetry for reqshield.
//!
//! Structured logging setup, request spans, the request counters and their
//! mirror onto the `metrics` facade.

mod logging;
pub mod metrics;
mod spans;
mod stats;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use spans::{RequestSpan, SpanExt};
pub use stats::{RequestStats, StatsSnapshot};
