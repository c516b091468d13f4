//! Span utilities and extension traits for request tracing.
//!
//! Provides standardized span creation and result recording.

use tracing::{info_span, Span};

/// Extension trait for adding context to spans.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for creating standardized request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Create the span for one underlying execution of `key`.
    ///
    /// Fields included:
    /// - `key`: Request key supplied by the caller
    /// - `retry`: Whether the retry policy wraps the operation
    /// - `status`: To be filled in by `SpanExt::record_result`
    /// - `error.message`: To be filled in on error
    /// - `attempts`: Number of operation invocations
    /// - `latency_ms`: To be filled in after completion
    pub fn new(key: &str, retry: bool) -> Span {
        info_span!(
            "execute_request",
            key = %key,
            retry = retry,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            attempts = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }

    /// Create the span for one queued operation.
    pub fn queued(item_id: u64) -> Span {
        info_span!(
            "queued_operation",
            item_id = item_id,
            state = tracing::field::Empty,
            wait_ms = tracing::field::Empty,
        )
    }
}
