//! Request coalescing behind a background batching loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;
use crate::handler::Handler;
use crate::request::{Attachments, Request, Response};
use crate::stream;

use super::run_buffered;

/// Default separator joining batched inputs and splitting batched outputs.
pub const DEFAULT_BATCH_SEPARATOR: &str = "\n---BATCH_SEPARATOR---\n";

struct BatchRequest {
    input: Vec<u8>,
    reply: oneshot::Sender<Result<Vec<u8>, FlowError>>,
}

/// Coalesces concurrent calls into single downstream invocations.
///
/// A background loop owns the wrapped handler. Each call submits its
/// buffered input and waits on a reply channel. The loop flushes when
/// `max_size` requests are pending, or when `max_wait` has passed since
/// the first pending request: inputs are concatenated with the separator,
/// the wrapped handler runs once, and its output is split on the same
/// separator and answered to the callers in submission order. When the
/// split does not yield one part per caller, the first caller receives the
/// whole output and the rest a [`FlowError::BatchSplit`].
///
/// A caller whose request context is cancelled stops waiting immediately;
/// the loop never blocks delivering to a caller that has gone away.
/// Dropping the batcher flushes whatever is pending and stops the loop.
///
/// Must be constructed inside a tokio runtime.
pub struct Batch {
    tx: mpsc::Sender<BatchRequest>,
}

impl Batch {
    /// Coalesce up to `max_size` requests, waiting at most `max_wait` after
    /// the first, using [`DEFAULT_BATCH_SEPARATOR`].
    pub fn new(handler: impl Handler + 'static, max_size: usize, max_wait: Duration) -> Self {
        Self::with_separator(handler, max_size, max_wait, DEFAULT_BATCH_SEPARATOR)
    }

    /// Same as [`Batch::new`] with a custom separator. Callers are
    /// responsible for choosing a separator that cannot occur in their
    /// payloads.
    pub fn with_separator(
        handler: impl Handler + 'static,
        max_size: usize,
        max_wait: Duration,
        separator: impl Into<String>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(64);
        let batch_loop = BatchLoop {
            handler: Arc::new(handler),
            max_size: max_size.max(1),
            max_wait,
            separator: separator.into().into_bytes(),
            rx,
        };
        tokio::spawn(batch_loop.run());
        Self { tx }
    }
}

#[async_trait]
impl Handler for Batch {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, _attachments, mut reader) = req.into_parts();
        let input = stream::read_all(&ctx, &mut reader).await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        let submitted = self.tx.send(BatchRequest {
            input,
            reply: reply_tx,
        });
        tokio::select! {
            sent = submitted => {
                sent.map_err(|_| FlowError::handler("batch loop stopped"))?;
            }
            _ = ctx.cancelled() => return Err(FlowError::Cancelled),
        }

        let output = tokio::select! {
            reply = reply_rx => {
                reply.map_err(|_| FlowError::handler("batch loop dropped reply"))??
            }
            _ = ctx.cancelled() => return Err(FlowError::Cancelled),
        };
        res.write_all(&output).await?;
        Ok(())
    }
}

struct BatchLoop {
    handler: Arc<dyn Handler>,
    max_size: usize,
    max_wait: Duration,
    separator: Vec<u8>,
    rx: mpsc::Receiver<BatchRequest>,
}

impl BatchLoop {
    async fn run(mut self) {
        // The loop's own token: batched work is not tied to any single
        // caller's context.
        let ctx = CancellationToken::new();
        let mut pending: Vec<BatchRequest> = Vec::new();
        let mut deadline: Option<Instant> = None;
        loop {
            let timer = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                received = self.rx.recv() => match received {
                    Some(request) => {
                        pending.push(request);
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.max_wait);
                        }
                        if pending.len() >= self.max_size {
                            self.flush(&ctx, &mut pending).await;
                            deadline = None;
                        }
                    }
                    None => {
                        if !pending.is_empty() {
                            self.flush(&ctx, &mut pending).await;
                        }
                        break;
                    }
                },
                _ = timer => {
                    if !pending.is_empty() {
                        self.flush(&ctx, &mut pending).await;
                    }
                    deadline = None;
                }
            }
        }
    }

    async fn flush(&self, ctx: &CancellationToken, pending: &mut Vec<BatchRequest>) {
        let batch = std::mem::take(pending);
        tracing::debug!(size = batch.len(), "flushing batch");

        let mut joined = Vec::new();
        for (i, request) in batch.iter().enumerate() {
            if i > 0 {
                joined.extend_from_slice(&self.separator);
            }
            joined.extend_from_slice(&request.input);
        }

        let attachments = Attachments::new();
        match run_buffered(&self.handler, ctx, &attachments, joined).await {
            Ok(output) => {
                let parts = split_on(&output, &self.separator);
                if parts.len() == batch.len() {
                    for (request, part) in batch.into_iter().zip(parts) {
                        let _ = request.reply.send(Ok(part));
                    }
                } else {
                    let expected = batch.len();
                    let actual = parts.len();
                    let mut callers = batch.into_iter();
                    if let Some(first) = callers.next() {
                        let _ = first.reply.send(Ok(output));
                    }
                    for request in callers {
                        let _ = request.reply.send(Err(FlowError::BatchSplit { expected, actual }));
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                for request in batch {
                    let _ = request.reply.send(Err(FlowError::handler(message.clone())));
                }
            }
        }
    }
}

fn split_on(bytes: &[u8], separator: &[u8]) -> Vec<Vec<u8>> {
    if separator.is_empty() {
        return vec![bytes.to_vec()];
    }
    let mut parts = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i + separator.len() <= bytes.len() {
        if &bytes[i..i + separator.len()] == separator {
            parts.push(bytes[start..i].to_vec());
            i += separator.len();
            start = i;
        } else {
            i += 1;
        }
    }
    parts.push(bytes[start..].to_vec());
    parts
}

#[cfg(test)]
mod tests {
    use super::split_on;

    #[test]
    fn split_on_separator() {
        let parts = split_on(b"a|b|c", b"|");
        assert_eq!(parts, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn split_without_separator_is_whole() {
        let parts = split_on(b"abc", b"|");
        assert_eq!(parts, vec![b"abc".to_vec()]);
    }

    #[test]
    fn split_keeps_empty_parts() {
        let parts = split_on(b"|a|", b"|");
        assert_eq!(
            parts,
            vec![b"".to_vec(), b"a".to_vec(), b"".to_vec()]
        );
    }

    #[test]
    fn split_multibyte_separator() {
        let parts = split_on(b"x--y--z", b"--");
        assert_eq!(parts, vec![b"x".to_vec(), b"y".to_vec(), b"z".to_vec()]);
    }
}
