//! Token-bucket admission control.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream;

/// Token-bucket gate: admits one call per token, then streams through.
///
/// Capacity is `rate` tokens; one token refills every `per / rate`. A call
/// that finds the bucket empty blocks until the next refill, observing the
/// request's cancellation token. A zero `rate` is a configuration error
/// surfaced at call time.
pub struct RateLimit {
    rate: u32,
    interval: Duration,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimit {
    /// Admit at most `rate` calls per `per`, with bursts up to `rate`.
    pub fn new(rate: u32, per: Duration) -> Self {
        let interval = if rate > 0 { per / rate } else { Duration::ZERO };
        Self {
            rate,
            interval,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take a token if available; otherwise how long until the next refill.
    fn try_acquire(&self) -> Option<Duration> {
        // a refill interval that rounds to zero means the bucket can never
        // be observed empty
        if self.interval.is_zero() {
            return None;
        }
        let mut bucket = self.bucket.lock().expect("rate limit lock poisoned");
        let elapsed = bucket.last_refill.elapsed();
        let refills = (elapsed.as_nanos() / self.interval.as_nanos()) as u32;
        if refills > 0 {
            bucket.tokens = bucket.tokens.saturating_add(refills).min(self.rate);
            bucket.last_refill += self.interval * refills;
        }
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            None
        } else {
            Some(
                self.interval
                    .checked_sub(bucket.last_refill.elapsed())
                    .unwrap_or(Duration::ZERO),
            )
        }
    }
}

#[async_trait]
impl Handler for RateLimit {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        if self.rate == 0 {
            return Err(FlowError::Config("rate limit rate must be positive".into()));
        }
        let (ctx, _attachments, mut reader) = req.into_parts();
        while let Some(wait) = self.try_acquire() {
            tracing::trace!(wait = ?wait, "rate limit bucket empty");
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = ctx.cancelled() => return Err(FlowError::Cancelled),
            }
        }
        stream::copy(&ctx, &mut reader, res.writer()).await?;
        Ok(())
    }
}
