//! Buffered retry with exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream;

use super::run_buffered;

/// Delay before the second attempt; doubles after each failure.
const BACKOFF_BASE: Duration = Duration::from_millis(100);

/// Re-runs a wrapped handler over a replayable, buffered input.
///
/// Up to `max_attempts` invocations; after each failure but the last, the
/// call sleeps `100ms × 2^(attempt-1)`. The first successful attempt's
/// buffered output is written downstream. When every attempt fails, or
/// `max_attempts` is zero, the call fails with
/// [`FlowError::RetryExhausted`] wrapping the last error.
pub struct Retry {
    inner: Arc<dyn Handler>,
    max_attempts: u32,
}

impl Retry {
    /// Allow `handler` up to `max_attempts` invocations per call.
    pub fn new(handler: impl Handler + 'static, max_attempts: u32) -> Self {
        Self {
            inner: Arc::new(handler),
            max_attempts,
        }
    }
}

#[async_trait]
impl Handler for Retry {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, attachments, mut reader) = req.into_parts();
        let input = stream::read_all(&ctx, &mut reader).await?;

        let mut last_err: Option<FlowError> = None;
        for attempt in 1..=self.max_attempts {
            match run_buffered(&self.inner, &ctx, &attachments, input.clone()).await {
                Ok(output) => {
                    res.write_all(&output).await?;
                    return Ok(());
                }
                Err(err) => {
                    tracing::debug!(attempt, error = %err, "retry attempt failed");
                    last_err = Some(err);
                    if attempt < self.max_attempts {
                        let delay = BACKOFF_BASE * 2u32.pow(attempt - 1);
                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = ctx.cancelled() => return Err(FlowError::Cancelled),
                        }
                    }
                }
            }
        }
        Err(FlowError::RetryExhausted {
            attempts: self.max_attempts,
            source: last_err.map(Box::new),
        })
    }
}
