//! Error taxonomy of the ingestion pipeline
//!
//! - [`ValidationError`]: malformed or out-of-domain input, never retried
//! - [`SinkError`]: a sink write failed; `retryable` decides redelivery vs. dead letter
//! - [`CircuitOpenError`]: a guarded dependency is presumed unhealthy
//! - [`DeadLetterPersistError`]: the dead-letter store itself failed

use std::fmt;
use std::time::Duration;

use crate::storage::StorageError;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    pub reason: String,
}

impl ValidationError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "validation failed: {}", self.reason)
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq)]
pub struct SinkError {
    pub retryable: bool,
    pub reason: String,
}

impl SinkError {
    pub fn retryable(reason: impl Into<String>) -> Self {
        Self {
            retryable: true,
            reason: reason.into(),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self {
            retryable: false,
            reason: reason.into(),
        }
    }

    pub fn timeout(after: Duration) -> Self {
        Self::retryable(format!("timeout after {}ms", after.as_millis()))
    }
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.retryable {
            "retryable"
        } else {
            "non-retryable"
        };
        write!(f, "{kind} sink error: {}", self.reason)
    }
}

impl std::error::Error for SinkError {}

impl From<StorageError> for SinkError {
    fn from(err: StorageError) -> Self {
        SinkError {
            retryable: err.is_retryable(),
            reason: err.to_string(),
        }
    }
}

/// The breaker guarding `dependency` rejected the call without attempting it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitOpenError {
    pub dependency: String,
}

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "circuit open for dependency '{}'", self.dependency)
    }
}

impl std::error::Error for CircuitOpenError {}

/// Outcome of a call made through a [`crate::breaker::CircuitBreaker`]
#[derive(Debug)]
pub enum BreakerError<E> {
    /// Rejected without calling the operation
    Open(CircuitOpenError),

    /// The operation did not finish within the breaker's call timeout
    Timeout(Duration),

    /// The operation itself failed
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open(_))
    }

    /// Timeouts are retryable unless the breaker short-circuited the call
    pub fn is_retryable(&self) -> bool {
        matches!(self, BreakerError::Timeout(_))
    }
}

impl<E: fmt::Display> fmt::Display for BreakerError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerError::Open(err) => write!(f, "{err}"),
            BreakerError::Timeout(after) => {
                write!(f, "guarded call timed out after {}ms", after.as_millis())
            }
            BreakerError::Inner(err) => write!(f, "{err}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for BreakerError<E> {}

#[derive(Debug)]
pub struct DeadLetterPersistError {
    pub message_id: String,
    pub source: StorageError,
}

impl fmt::Display for DeadLetterPersistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to persist dead letter '{}': {}",
            self.message_id, self.source
        )
    }
}

impl std::error::Error for DeadLetterPersistError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}
