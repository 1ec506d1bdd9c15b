//! Deadline enforcement for a wrapped handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};

/// Enforces a deadline on a wrapped handler.
///
/// The handler runs under a child cancellation token; when the deadline
/// fires first, the child token is cancelled and the call fails with
/// [`FlowError::HandlerTimeout`]. A zero duration times out immediately.
pub struct Timeout {
    inner: Arc<dyn Handler>,
    duration: Duration,
}

impl Timeout {
    /// Give `handler` at most `duration` per call.
    pub fn new(handler: impl Handler + 'static, duration: Duration) -> Self {
        Self {
            inner: Arc::new(handler),
            duration,
        }
    }
}

#[async_trait]
impl Handler for Timeout {
    async fn serve(&self, req: Request, res: Response) -> Result<(), FlowError> {
        if self.duration.is_zero() {
            return Err(FlowError::HandlerTimeout(self.duration));
        }
        let child = req.context().child_token();
        let req = req.with_context(child.clone());
        tokio::select! {
            result = self.inner.serve(req, res) => result,
            _ = tokio::time::sleep(self.duration) => {
                tracing::debug!(duration = ?self.duration, "handler timed out");
                child.cancel();
                Err(FlowError::HandlerTimeout(self.duration))
            }
        }
    }
}
