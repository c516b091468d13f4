//! Keyed request execution.
//!
//! Response caching, in-flight deduplication and retry with backoff,
//! composed behind [`RequestExecutor::execute`].

mod cache;
mod error;
mod pending;
mod request;
mod retry;

pub use cache::{ResponseCache, ResponseCacheConfig};
pub use error::{Classify, ErrorClass, ExecError, TimeoutPhase, TransportError};
pub use pending::{ErasedValue, PendingRegistry, PendingSlot, Registration, SharedOutcome};
pub use request::{ExecuteOptions, RequestExecutor, RequestExecutorConfig};
pub use retry::{RetryConfig, RetryOutcome, RetryPolicy, RetryState};
