//! Ordered fallback behind per-handler circuit breakers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream;

use super::run_buffered;

/// Consecutive failures that open a breaker.
const FAILURE_THRESHOLD: u32 = 5;

/// How long an open breaker rejects calls before probing again.
const OPEN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Three-state circuit breaker guarding one fallback arm.
///
/// Closed → open after [`FAILURE_THRESHOLD`] consecutive failures; open →
/// half-open once [`OPEN_TIMEOUT`] elapses; half-open → closed on success,
/// back to open on failure. State is shared by every call to the owning
/// [`Fallback`] value.
#[derive(Debug)]
struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    fn new() -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Whether a call may proceed right now.
    fn allow(&self) -> bool {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let expired = inner
                    .opened_at
                    .map(|at| at.elapsed() >= OPEN_TIMEOUT)
                    .unwrap_or(true);
                if expired {
                    inner.state = BreakerState::HalfOpen;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        inner.state = BreakerState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
            }
            BreakerState::Closed => {
                inner.failures += 1;
                if inner.failures >= FAILURE_THRESHOLD {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            BreakerState::Open => {}
        }
    }
}

/// Tries handlers in order over a replayable, buffered input, skipping
/// arms whose circuit breaker is open.
///
/// The first success wins and its output is written downstream. When every
/// arm fails or is skipped, the call fails with
/// [`FlowError::AllHandlersFailed`] wrapping the last error.
pub struct Fallback {
    arms: Vec<(Arc<dyn Handler>, CircuitBreaker)>,
}

impl Fallback {
    /// Create an empty fallback set.
    pub fn new() -> Self {
        Self { arms: Vec::new() }
    }

    /// Append a fallback arm with its own circuit breaker.
    pub fn or(mut self, handler: impl Handler + 'static) -> Self {
        self.arms.push((Arc::new(handler), CircuitBreaker::new()));
        self
    }
}

impl Default for Fallback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for Fallback {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, attachments, mut reader) = req.into_parts();
        let input = stream::read_all(&ctx, &mut reader).await?;

        let mut last_err: Option<FlowError> = None;
        for (i, (handler, breaker)) in self.arms.iter().enumerate() {
            if !breaker.allow() {
                tracing::debug!(arm = i, "skipping arm with open breaker");
                continue;
            }
            match run_buffered(handler, &ctx, &attachments, input.clone()).await {
                Ok(output) => {
                    breaker.record_success();
                    res.write_all(&output).await?;
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(arm = i, error = %err, "fallback arm failed");
                    breaker.record_failure();
                    last_err = Some(err);
                }
            }
        }
        Err(FlowError::AllHandlersFailed {
            source: last_err.map(Box::new),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_opens_after_threshold() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
            assert!(breaker.allow());
        }
        breaker.record_failure();
        assert!(!breaker.allow());
    }

    #[test]
    fn breaker_success_resets_failure_count() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        breaker.record_success();
        for _ in 0..FAILURE_THRESHOLD - 1 {
            breaker.record_failure();
        }
        assert!(breaker.allow());
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_half_opens_after_timeout() {
        let breaker = CircuitBreaker::new();
        for _ in 0..FAILURE_THRESHOLD {
            breaker.record_failure();
        }
        assert!(!breaker.allow());

        tokio::time::advance(OPEN_TIMEOUT).await;
        // first probe allowed, half-open
        assert!(breaker.allow());

        // failure while half-open reopens immediately
        breaker.record_failure();
        assert!(!breaker.allow());

        tokio::time::advance(OPEN_TIMEOUT).await;
        assert!(breaker.allow());
        breaker.record_success();
        assert!(breaker.allow());
    }
}
