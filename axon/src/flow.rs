//! The flow engine: concurrent handler composition over bounded pipes.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::convert::{InputSource, OutputTarget};
use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Attachments, Request, Response};
use crate::stream::{self, BoxReader, DEFAULT_PIPE_CAPACITY};

/// Bound on concurrent in-flight handler tasks across one flow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// `50 ×` the host's available parallelism.
    Auto,
    /// No gating; every handler task starts immediately.
    Unbounded,
    /// At most this many handler tasks run at once. `Limit(0)` behaves as
    /// [`Concurrency::Unbounded`].
    Limit(usize),
}

impl Concurrency {
    fn permits(self) -> Option<usize> {
        match self {
            Concurrency::Auto => {
                let cores = std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1);
                Some(cores * 50)
            }
            Concurrency::Unbounded => None,
            Concurrency::Limit(0) => None,
            Concurrency::Limit(n) => Some(n),
        }
    }
}

/// Configuration for a [`Flow`].
#[derive(Debug, Clone)]
pub struct FlowConfig {
    /// Concurrency bound for handler tasks.
    pub max_concurrent: Concurrency,
    /// Optional whole-run deadline applied to every [`Flow::run`] call.
    pub timeout: Option<Duration>,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_concurrent: Concurrency::Auto,
            timeout: None,
        }
    }
}

/// An ordered composition of handlers that runs as a concurrent pipeline
/// on every call.
///
/// Adjacent handlers are connected by bounded pipes: a handler slower than
/// its predecessor applies backpressure naturally. A flow is immutable once
/// built; every [`run`](Flow::run) spawns its own tasks and pipes and
/// releases them before returning.
pub struct Flow {
    handlers: Vec<Arc<dyn Handler>>,
    config: FlowConfig,
}

impl Flow {
    /// Create an empty flow with the default configuration.
    pub fn new() -> Self {
        Self::with_config(FlowConfig::default())
    }

    /// Create an empty flow with an explicit configuration.
    pub fn with_config(config: FlowConfig) -> Self {
        Self {
            handlers: Vec::new(),
            config,
        }
    }

    /// Append a handler. Bytes written by the previous handler stream into
    /// this one through a bounded pipe.
    pub fn then(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    /// Number of handlers in the flow.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether the flow has no handlers.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run the flow: resolve `input` to a byte stream, drive it through
    /// every handler concurrently, and deliver the terminal bytes to
    /// `output`.
    ///
    /// The first handler error cancels the shared context, the remaining
    /// tasks are drained, and that first error is returned. An empty flow
    /// copies the input straight to the output.
    pub async fn run<I, O>(
        &self,
        ctx: &CancellationToken,
        input: I,
        output: &mut O,
    ) -> Result<(), FlowError>
    where
        I: InputSource,
        O: OutputTarget + ?Sized,
    {
        let run_ctx = ctx.child_token();
        match self.config.timeout {
            None => self.run_inner(&run_ctx, input, output).await,
            Some(limit) => {
                tokio::select! {
                    res = self.run_inner(&run_ctx, input, output) => res,
                    _ = tokio::time::sleep(limit) => {
                        run_ctx.cancel();
                        Err(FlowError::DeadlineExceeded(limit))
                    }
                }
            }
        }
    }

    async fn run_inner<I, O>(
        &self,
        run_ctx: &CancellationToken,
        input: I,
        output: &mut O,
    ) -> Result<(), FlowError>
    where
        I: InputSource,
        O: OutputTarget + ?Sized,
    {
        if run_ctx.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        let mut reader: BoxReader = input.into_reader()?;
        if self.handlers.is_empty() {
            return output.consume(reader).await;
        }

        tracing::debug!(handlers = self.handlers.len(), "starting flow run");
        let semaphore = self
            .config
            .max_concurrent
            .permits()
            .map(|n| Arc::new(Semaphore::new(n)));
        let attachments = Attachments::new();

        let mut tasks: JoinSet<Result<(), FlowError>> = JoinSet::new();
        for handler in &self.handlers {
            let (next_reader, writer) = stream::pipe(DEFAULT_PIPE_CAPACITY);
            let req = Request::with_attachments(run_ctx.clone(), reader, attachments.clone());
            let res = Response::new(Box::new(writer));
            let handler = Arc::clone(handler);
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = match semaphore {
                    Some(sem) => {
                        Some(sem.acquire_owned().await.map_err(|_| FlowError::Cancelled)?)
                    }
                    None => None,
                };
                handler.serve(req, res).await
            });
            reader = Box::new(next_reader);
        }

        // The engine owns the terminal pipe: drain it concurrently so the
        // final handler never blocks on an unconsumed pipe, then hand the
        // captured bytes to the output binding.
        let capture_ctx = run_ctx.clone();
        let mut terminal = reader;
        let capture =
            tokio::spawn(async move { stream::read_all(&capture_ctx, &mut terminal).await });

        let mut first_err: Option<FlowError> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .unwrap_or_else(|e| Err(FlowError::handler(format!("handler task failed: {e}"))));
            if let Err(err) = result {
                if first_err.is_none() {
                    tracing::debug!(error = %err, "handler failed; cancelling flow run");
                    run_ctx.cancel();
                    first_err = Some(err);
                }
            }
        }

        let captured = capture
            .await
            .unwrap_or_else(|e| Err(FlowError::handler(format!("capture task failed: {e}"))));

        if let Some(err) = first_err {
            return Err(err);
        }
        let bytes = captured?;
        tracing::debug!(bytes = bytes.len(), "flow run complete");
        output
            .consume(Box::new(std::io::Cursor::new(bytes)))
            .await
    }
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}
