//! Error taxonomy for guarded calls.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by calls that go through the engine.
///
/// `E` is the caller's own downstream error type.
#[derive(Debug, Error)]
pub enum ResilienceError<E> {
    /// The rate limiter refused admission. Never retried.
    #[error("Rate limit exceeded for {key}, window resets in {retry_after:?}")]
    RateLimited { key: String, retry_after: Duration },

    /// The circuit for the target is open. Never retried.
    #[error("Circuit open for {target}, retry in {retry_after:?}")]
    CircuitOpen { target: String, retry_after: Duration },

    /// The call thunk itself failed.
    #[error("Downstream call failed: {0}")]
    Downstream(#[source] E),

    /// A single attempt exceeded its deadline.
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the call.
    #[error("Call cancelled")]
    Cancelled,
}

/// Discriminant of [`ResilienceError`], used for logging and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    RateLimited,
    CircuitOpen,
    Downstream,
    Timeout,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::Downstream => "downstream",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<E> ResilienceError<E> {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResilienceError::RateLimited { .. } => ErrorKind::RateLimited,
            ResilienceError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ResilienceError::Downstream(_) => ErrorKind::Downstream,
            ResilienceError::Timeout(_) => ErrorKind::Timeout,
            ResilienceError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// True for errors a retry policy may consider at all.
    ///
    /// Rejections by the engine itself and cancellations are always terminal.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResilienceError::Downstream(_) | ResilienceError::Timeout(_)
        )
    }

    /// True when the engine declined to call downstream.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ResilienceError::RateLimited { .. } | ResilienceError::CircuitOpen { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ResilienceError::Cancelled)
    }

    /// The wrapped downstream error, if this is one.
    pub fn downstream(&self) -> Option<&E> {
        match self {
            ResilienceError::Downstream(e) => Some(e),
            _ => None,
        }
    }

    /// Convert the downstream error type, keeping every other variant.
    pub fn map_downstream<F, E2>(self, f: F) -> ResilienceError<E2>
    where
        F: FnOnce(E) -> E2,
    {
        match self {
            ResilienceError::RateLimited { key, retry_after } => {
                ResilienceError::RateLimited { key, retry_after }
            }
            ResilienceError::CircuitOpen {
                target,
                retry_after,
            } => ResilienceError::CircuitOpen {
                target,
                retry_after,
            },
            ResilienceError::Downstream(e) => ResilienceError::Downstream(f(e)),
            ResilienceError::Timeout(d) => ResilienceError::Timeout(d),
            ResilienceError::Cancelled => ResilienceError::Cancelled,
        }
    }
}

/// Result type for guarded calls.
pub type ResilienceResult<T, E> = Result<T, ResilienceError<E>>;
