//! Stream duplication to external sinks.

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::Mutex;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Request, Response};
use crate::stream::{self, BoxWriter};

/// Streams the input to every configured sink and to the downstream
/// response simultaneously.
///
/// Sinks are shared across calls to the same `Tee` value; concurrent calls
/// serialize on them and interleave whole chunks.
pub struct Tee {
    sinks: Mutex<Vec<BoxWriter>>,
}

impl Tee {
    /// Duplicate into the given external sinks.
    pub fn new(sinks: Vec<BoxWriter>) -> Self {
        Self {
            sinks: Mutex::new(sinks),
        }
    }
}

#[async_trait]
impl Handler for Tee {
    async fn serve(&self, req: Request, res: Response) -> Result<(), FlowError> {
        let (ctx, _attachments, mut reader) = req.into_parts();
        let mut downstream = res.into_writer();
        let mut sinks = self.sinks.lock().await;

        let mut writers: Vec<&mut (dyn AsyncWrite + Send + Unpin)> =
            Vec::with_capacity(sinks.len() + 1);
        writers.push(&mut *downstream);
        for sink in sinks.iter_mut() {
            writers.push(&mut **sink);
        }
        stream::tee(&ctx, &mut reader, writers).await?;
        Ok(())
    }
}
