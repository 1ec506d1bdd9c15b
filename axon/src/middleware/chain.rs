//! Sequential composition with in-context attachment propagation.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream;

use super::run_buffered;

/// Runs handlers one after another, buffering between links.
///
/// In contrast to [`Flow`](crate::Flow), which runs its handlers
/// concurrently over pipes, a chain completes each link before starting
/// the next. Every link sees the same [`Attachments`](crate::Attachments)
/// map, so a value attached by an early link (a tool registry, say) is
/// visible to the links after it. The final link streams directly to the
/// outer response; only the inner links are buffered.
///
/// An empty chain behaves as a pass-through.
pub struct Chain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl Chain {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Append a link.
    pub fn then(mut self, handler: impl Handler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Handler for Chain {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, attachments, mut reader) = req.into_parts();
        if self.handlers.is_empty() {
            stream::copy(&ctx, &mut reader, res.writer()).await?;
            return Ok(());
        }

        let mut current = stream::read_all(&ctx, &mut reader).await?;
        let last = self.handlers.len() - 1;
        for handler in &self.handlers[..last] {
            current = run_buffered(handler, &ctx, &attachments, current).await?;
        }

        let req = Request::with_attachments(ctx, Box::new(Cursor::new(current)), attachments);
        self.handlers[last].serve(req, res).await
    }
}
