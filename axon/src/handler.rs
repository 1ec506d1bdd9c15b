//! The handler contract and the function adapter.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::request::{Request, Response};

/// A unit of streaming work: consumes the request stream, produces the
/// response stream.
///
/// Handlers are long-lived values; one instance may serve many concurrent
/// calls, so per-call state belongs on [`Request`] and [`Response`], never
/// on the handler itself. A handler must either fully consume its input or
/// deliberately drop it, and its output closes when the [`Response`] is
/// dropped on return, success or failure. A handler that fails may leave
/// its output partially written.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Process one call.
    async fn serve(&self, req: Request, res: Response) -> Result<(), FlowError>;
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn serve(&self, req: Request, res: Response) -> Result<(), FlowError> {
        (**self).serve(req, res).await
    }
}

/// Adapter created by [`handler_fn`].
pub struct HandlerFn<F> {
    f: F,
}

/// Lift a plain async function into a [`Handler`].
///
/// ```
/// use axon::{handler_fn, FlowError};
///
/// let upper = handler_fn(|mut req, mut res| async move {
///     let input = req.read_all().await?;
///     res.write_all(&input.to_ascii_uppercase()).await?;
///     Ok::<(), FlowError>(())
/// });
/// # let _ = upper;
/// ```
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    HandlerFn { f }
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), FlowError>> + Send,
{
    async fn serve(&self, req: Request, res: Response) -> Result<(), FlowError> {
        (self.f)(req, res).await
    }
}
