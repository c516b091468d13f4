//! Retry policy with exponential backoff.
//!
//! An attempt failing with a retryable error (see [`ErrorClass`]) is
//! followed by a sleep and another attempt, until the attempt budget is
//! spent. Non-retryable errors end the loop on first occurrence.

use std::future::Future;
use std::time::Duration;

use super::error::{Classify, ErrorClass};

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// Upper bound on a single backoff delay. `None` lets it grow freely.
    pub max_delay: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            multiplier: 2.0,
            max_delay: None,
        }
    }
}

/// Per-execution retry bookkeeping. Never shared across keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryState {
    pub attempt: u32,
    pub next_delay: Duration,
}

/// Result of running an operation under the policy.
#[derive(Debug)]
pub struct RetryOutcome<V, E> {
    pub result: Result<V, E>,
    /// Number of times the operation was invoked.
    pub attempts: u32,
}

/// Stateless retry policy; cheap to clone into operation tasks.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Whether `error` should be retried.
    pub fn is_retryable<E: Classify>(error: &E) -> bool {
        error.class().is_retryable()
    }

    /// Backoff to wait before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let mut state = self.initial_state();
        for _ in 1..retry {
            state.next_delay = self.grow(state.next_delay);
        }
        state.next_delay
    }

    fn initial_state(&self) -> RetryState {
        RetryState {
            attempt: 0,
            next_delay: self.cap(self.config.initial_delay),
        }
    }

    fn grow(&self, delay: Duration) -> Duration {
        let grown = Duration::try_from_secs_f64(delay.as_secs_f64() * self.config.multiplier)
            .unwrap_or(Duration::MAX);
        self.cap(grown)
    }

    fn cap(&self, delay: Duration) -> Duration {
        match self.config.max_delay {
            Some(max) => delay.min(max),
            None => delay,
        }
    }

    /// Invoke `operation` until it succeeds, fails terminally or the
    /// attempt budget runs out. `on_retry` fires before each backoff sleep
    /// with the upcoming attempt number, the delay and the error being retried.
    pub async fn run<V, E, F, Fut, R>(&self, mut operation: F, mut on_retry: R) -> RetryOutcome<V, E>
    where
        E: Classify,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        R: FnMut(u32, Duration, &E),
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut state = self.initial_state();

        loop {
            state.attempt += 1;
            let error = match operation().await {
                Ok(value) => {
                    return RetryOutcome { result: Ok(value), attempts: state.attempt };
                }
                Err(error) => error,
            };

            let class = error.class();
            if !class.is_retryable() || state.attempt >= max_attempts {
                log_terminal(class, state.attempt, max_attempts);
                return RetryOutcome { result: Err(error), attempts: state.attempt };
            }

            let delay = state.next_delay;
            on_retry(state.attempt + 1, delay, &error);
            tokio::time::sleep(delay).await;
            state.next_delay = self.grow(delay);
        }
    }
}

fn log_terminal(class: ErrorClass, attempt: u32, max_attempts: u32) {
    if class.is_retryable() {
        tracing::debug!(?class, attempt, max_attempts, "retry budget exhausted");
    } else {
        tracing::debug!(?class, attempt, "non-retryable error");
    }
}
