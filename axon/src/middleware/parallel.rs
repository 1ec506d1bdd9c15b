//! Concurrent fan-out/fan-in.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream::{self, DEFAULT_PIPE_CAPACITY, PipeWriter};

/// Literal separator between joined fan-in outputs.
pub const PARALLEL_SEPARATOR: &str = "\n---\n";

/// Runs every handler concurrently over a duplicate of the input.
///
/// A single producer task copies the input stream into one bounded pipe
/// per handler; each handler's output is captured in its own buffer. On
/// success the buffers are written downstream joined by
/// [`PARALLEL_SEPARATOR`], in completion order; under concurrency that is
/// not the registration order. The first handler error cancels the rest
/// and is returned. An empty set passes the input through.
pub struct Parallel {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Parallel {
    /// Create an empty fan-out set.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Add a handler to the fan-out set.
    pub fn with(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }
}

impl Default for Parallel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for Parallel {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, attachments, mut reader) = req.into_parts();
        if self.handlers.is_empty() {
            stream::copy(&ctx, &mut reader, res.writer()).await?;
            return Ok(());
        }

        let fan_ctx = ctx.child_token();
        let mut feeds: Vec<PipeWriter> = Vec::with_capacity(self.handlers.len());
        let mut tasks: JoinSet<Result<Vec<u8>, FlowError>> = JoinSet::new();
        for handler in &self.handlers {
            let (in_reader, in_writer) = stream::pipe(DEFAULT_PIPE_CAPACITY);
            feeds.push(in_writer);
            let handler = Arc::clone(handler);
            let task_ctx = fan_ctx.clone();
            let attachments = attachments.clone();
            tasks.spawn(async move {
                let (mut out_reader, out_writer) = stream::pipe(DEFAULT_PIPE_CAPACITY);
                let req = Request::with_attachments(
                    task_ctx.clone(),
                    Box::new(in_reader),
                    attachments,
                );
                let out = Response::new(Box::new(out_writer));
                let (served, drained) = tokio::join!(
                    handler.serve(req, out),
                    stream::read_all(&task_ctx, &mut out_reader),
                );
                served?;
                drained
            });
        }

        // One producer duplicates the input into every pipe. A handler that
        // stops reading early just drops out of the fan-out; a genuine
        // input-read failure surfaces after the handlers are drained.
        let producer_ctx = fan_ctx.clone();
        let producer = tokio::spawn(async move {
            let mut slots: Vec<Option<PipeWriter>> = feeds.into_iter().map(Some).collect();
            let mut buf = vec![0u8; 8 * 1024];
            loop {
                let n = tokio::select! {
                    read = reader.read(&mut buf) => read?,
                    _ = producer_ctx.cancelled() => return Err(FlowError::Cancelled),
                };
                if n == 0 {
                    break;
                }
                for slot in slots.iter_mut() {
                    if let Some(feed) = slot {
                        if feed.write_all(&buf[..n]).await.is_err() {
                            *slot = None;
                        }
                    }
                }
                if slots.iter().all(|slot| slot.is_none()) {
                    break;
                }
            }
            Ok::<(), FlowError>(())
        });

        let mut outputs: Vec<Vec<u8>> = Vec::with_capacity(self.handlers.len());
        let mut first_err: Option<FlowError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(FlowError::handler(format!("handler task failed: {e}"))));
            match result {
                Ok(output) => outputs.push(output),
                Err(err) => {
                    if first_err.is_none() {
                        tracing::debug!(error = %err, "parallel handler failed; cancelling fan-out");
                        fan_ctx.cancel();
                        first_err = Some(err);
                    }
                }
            }
        }
        let produced = producer
            .await
            .unwrap_or_else(|e| Err(FlowError::handler(format!("fan-out task failed: {e}"))));

        if let Some(err) = first_err {
            return Err(err);
        }
        produced?;

        for (i, output) in outputs.iter().enumerate() {
            if i > 0 {
                res.write_all(PARALLEL_SEPARATOR.as_bytes()).await?;
            }
            res.write_all(output).await?;
        }
        Ok(())
    }
}
