//! Error taxonomy and retry classification.
//!
//! The executor never rewrites operation errors. It only asks them which
//! [`ErrorClass`] they belong to, through the [`Classify`] trait, so the
//! retry policy can decide whether another attempt is worthwhile.

use std::fmt;

use thiserror::Error;

/// Retry-relevant category of an operation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Connect, send or receive timeout.
    TransientTimeout,
    /// DNS failure, refused or reset connection.
    TransientConnection,
    /// Response carried a 5xx status.
    ServerError(u16),
    /// Response carried any status outside 5xx: 4xx, but also 1xx, 3xx and
    /// codes of 600 and above. Never retried.
    ClientError(u16),
    /// Payload could not be parsed or failed validation.
    ValidationOrDecoding,
    /// Anything the transport could not attribute.
    Unclassified,
}

impl ErrorClass {
    /// Classify an explicit response status code.
    pub fn from_status(status: u16) -> Self {
        if (500..600).contains(&status) {
            Self::ServerError(status)
        } else {
            Self::ClientError(status)
        }
    }

    /// Whether an error of this class is worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::TransientTimeout | Self::TransientConnection | Self::ServerError(_)
        )
    }
}

/// Implemented by operation error types so they can be classified.
pub trait Classify {
    fn class(&self) -> ErrorClass;
}

impl<T: Classify + ?Sized> Classify for std::sync::Arc<T> {
    fn class(&self) -> ErrorClass {
        (**self).class()
    }
}

impl<T: Classify + ?Sized> Classify for Box<T> {
    fn class(&self) -> ErrorClass {
        (**self).class()
    }
}

/// Phase of a network exchange that timed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    Connect,
    Send,
    Receive,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect => write!(f, "connect"),
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Reference error type for transports feeding the executor.
///
/// Transport adapters map their native errors into this enum; callers with
/// their own error type implement [`Classify`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{0} timeout")]
    Timeout(TimeoutPhase),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status { status, message: message.into() }
    }
}

impl Classify for TransportError {
    fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::TransientTimeout,
            Self::Connection(_) => ErrorClass::TransientConnection,
            Self::Status { status, .. } => ErrorClass::from_status(*status),
            Self::Decode(_) | Self::Validation(_) => ErrorClass::ValidationOrDecoding,
            Self::Other(_) => ErrorClass::Unclassified,
        }
    }
}

/// Outcome of a failed `execute` call.
///
/// `Operation` carries the operation's own error untouched; the remaining
/// variants are produced by the executor itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError<E> {
    #[error("{0}")]
    Operation(E),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Executor is shutting down")]
    ShuttingDown,

    #[error("Key {key:?} holds a value of a different type")]
    TypeMismatch { key: String },

    #[error("Operation task aborted before completing")]
    Aborted,
}

impl<E> ExecError<E> {
    /// Borrow the operation error, if this failure came from the operation.
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Take the operation error, if this failure came from the operation.
    pub fn into_operation_error(self) -> Option<E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeouts_and_connection_errors_are_retryable() {
        for phase in [TimeoutPhase::Connect, TimeoutPhase::Send, TimeoutPhase::Receive] {
            assert!(TransportError::Timeout(phase).class().is_retryable());
        }
        assert!(TransportError::Connection("refused".into()).class().is_retryable());
    }

    #[test]
    fn only_5xx_statuses_are_retryable() {
        assert!(ErrorClass::from_status(500).is_retryable());
        assert!(ErrorClass::from_status(503).is_retryable());
        assert!(ErrorClass::from_status(599).is_retryable());
        assert!(!ErrorClass::from_status(600).is_retryable());
        assert!(!ErrorClass::from_status(404).is_retryable());
        assert!(!ErrorClass::from_status(429).is_retryable());
        assert!(!ErrorClass::from_status(302).is_retryable());
    }

    #[test]
    fn non_5xx_statuses_share_one_class() {
        for status in [101, 302, 404, 600, 999] {
            assert_eq!(ErrorClass::from_status(status), ErrorClass::ClientError(status));
        }
    }

    #[test]
    fn decode_and_unclassified_are_terminal() {
        assert!(!TransportError::Decode("bad json".into()).class().is_retryable());
        assert!(!TransportError::Validation("empty".into()).class().is_retryable());
        assert!(!TransportError::Other("bug".into()).class().is_retryable());
    }

    #[test]
    fn operation_error_passes_through_display() {
        let err: ExecError<TransportError> = ExecError::Operation(TransportError::status(404, "missing"));
        assert_eq!(err.to_string(), "HTTP 404: missing");
        assert_eq!(
            err.into_operation_error(),
            Some(TransportError::Status { status: 404, message: "missing".into() })
        );
    }
}
