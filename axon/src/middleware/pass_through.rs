//! Identity middleware.

use async_trait::async_trait;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream;

/// Copies the request stream to the response unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl PassThrough {
    /// Create a pass-through handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Handler for PassThrough {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, _attachments, mut reader) = req.into_parts();
        stream::copy(&ctx, &mut reader, res.writer()).await?;
        Ok(())
    }
}
