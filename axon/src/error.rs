//! Error types for flows, handlers, and stores.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by flows, handlers, and control middleware.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum FlowError {
    /// A memory handler received empty or whitespace-only input.
    #[error("empty input")]
    EmptyInput,

    /// The call's cancellation context fired.
    #[error("context cancelled")]
    Cancelled,

    /// A flow-level deadline expired before the run finished.
    #[error("deadline exceeded after {0:?}")]
    DeadlineExceeded(Duration),

    /// A [`Timeout`](crate::middleware::Timeout) wrapper expired before its
    /// handler finished.
    #[error("handler timeout after {0:?}")]
    HandlerTimeout(Duration),

    /// Every attempt of a [`Retry`](crate::middleware::Retry) failed.
    #[error("retry exhausted after {attempts} attempts")]
    RetryExhausted {
        /// How many times the wrapped handler was invoked.
        attempts: u32,
        /// The last underlying failure, if any attempt ran.
        #[source]
        source: Option<Box<FlowError>>,
    },

    /// Every arm of a [`Fallback`](crate::middleware::Fallback) failed or
    /// was skipped by its circuit breaker.
    #[error("all handlers failed")]
    AllHandlersFailed {
        /// The last underlying failure, if any arm ran.
        #[source]
        source: Option<Box<FlowError>>,
    },

    /// A batched handler's output did not split into one part per caller.
    #[error("batch response splitting failed: expected {expected} parts, got {actual}")]
    BatchSplit {
        /// Number of requests coalesced into the batch.
        expected: usize,
        /// Number of parts the output actually split into.
        actual: usize,
    },

    /// An underlying store operation failed.
    #[error("store {op} failed")]
    Store {
        /// The store operation that failed.
        op: &'static str,
        /// The backend error.
        #[source]
        source: StoreError,
    },

    /// A persisted record or typed binding could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A middleware was constructed with an unusable configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error from a pipe or an external stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Catch-all for application handler failures.
    #[error("{0}")]
    Handler(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl FlowError {
    /// Wrap a store error with the operation that produced it.
    pub fn store(op: &'static str, source: StoreError) -> Self {
        Self::Store { op, source }
    }

    /// Lift an arbitrary error into a handler failure.
    pub fn handler(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Handler(err.into())
    }
}

/// Errors from a [`Store`](crate::Store) backend.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend rejected or failed the operation.
    #[error("backend error: {0}")]
    Backend(String),

    /// Stored bytes could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
