//! Predicate-routed branching.

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream;

/// Buffered two-way branch.
///
/// Reads the entire input, then routes it to one of two handlers based on
/// a predicate over the buffered bytes.
pub struct Branch<P> {
    predicate: P,
    if_handler: Arc<dyn Handler>,
    else_handler: Arc<dyn Handler>,
}

impl<P> Branch<P>
where
    P: Fn(&[u8]) -> bool + Send + Sync,
{
    /// Route to `if_handler` when `predicate` returns true, otherwise to
    /// `else_handler`.
    pub fn new(
        predicate: P,
        if_handler: impl Handler + 'static,
        else_handler: impl Handler + 'static,
    ) -> Self {
        Self {
            predicate,
            if_handler: Arc::new(if_handler),
            else_handler: Arc::new(else_handler),
        }
    }
}

#[async_trait]
impl<P> Handler for Branch<P>
where
    P: Fn(&[u8]) -> bool + Send + Sync,
{
    async fn serve(&self, req: Request, res: Response) -> Result<(), FlowError> {
        let (ctx, attachments, mut reader) = req.into_parts();
        let input = stream::read_all(&ctx, &mut reader).await?;
        let chosen = if (self.predicate)(&input) {
            &self.if_handler
        } else {
            &self.else_handler
        };
        let req = Request::with_attachments(ctx, Box::new(Cursor::new(input)), attachments);
        chosen.serve(req, res).await
    }
}
