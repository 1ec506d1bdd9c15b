//! Byte-stream primitives: bounded pipes, cancellable copy, tee.
//!
//! These are the only I/O building blocks handlers see. A [`pipe`] is the
//! edge between adjacent handlers in a flow; [`copy`], [`tee`], and
//! [`read_all`] move bytes while observing the caller's cancellation token
//! between chunks.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, SimplexStream, WriteHalf};
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;

/// Boxed readable byte stream.
pub type BoxReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed writable byte stream.
pub type BoxWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Read side of a [`pipe`].
pub type PipeReader = ReadHalf<SimplexStream>;

/// Write side of a [`pipe`].
pub type PipeWriter = WriteHalf<SimplexStream>;

/// Buffer capacity of pipes created by the flow engine.
pub const DEFAULT_PIPE_CAPACITY: usize = 64 * 1024;

const COPY_CHUNK: usize = 8 * 1024;

/// Create a bounded in-memory pipe.
///
/// Writes block once `capacity` unread bytes are in flight, which is the
/// backpressure mechanism between adjacent handlers. Dropping the writer
/// signals end-of-stream to the reader; dropping the reader makes further
/// writes fail with a broken-pipe error.
pub fn pipe(capacity: usize) -> (PipeReader, PipeWriter) {
    tokio::io::simplex(capacity)
}

/// Copy `reader` to `writer` until end-of-stream, flushing at the end.
///
/// Checks `ctx` between chunks and returns [`FlowError::Cancelled`] as soon
/// as it fires. Returns the number of bytes copied.
pub async fn copy<R, W>(
    ctx: &CancellationToken,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64, FlowError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = tokio::select! {
            res = reader.read(&mut buf) => res?,
            _ = ctx.cancelled() => return Err(FlowError::Cancelled),
        };
        if n == 0 {
            break;
        }
        tokio::select! {
            res = writer.write_all(&buf[..n]) => res?,
            _ = ctx.cancelled() => return Err(FlowError::Cancelled),
        }
        total += n as u64;
    }
    writer.flush().await?;
    Ok(total)
}

/// Duplicate `reader` into every writer in `sinks`, chunk by chunk, in
/// order. Flushes each sink at end-of-stream.
pub async fn tee<R>(
    ctx: &CancellationToken,
    reader: &mut R,
    mut sinks: Vec<&mut (dyn AsyncWrite + Send + Unpin)>,
) -> Result<u64, FlowError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut total = 0u64;
    loop {
        let n = tokio::select! {
            res = reader.read(&mut buf) => res?,
            _ = ctx.cancelled() => return Err(FlowError::Cancelled),
        };
        if n == 0 {
            break;
        }
        for sink in sinks.iter_mut() {
            tokio::select! {
                res = sink.write_all(&buf[..n]) => res?,
                _ = ctx.cancelled() => return Err(FlowError::Cancelled),
            }
        }
        total += n as u64;
    }
    for sink in sinks.iter_mut() {
        sink.flush().await?;
    }
    Ok(total)
}

/// Read `reader` to end-of-stream into an owned buffer, observing `ctx`.
pub async fn read_all<R>(ctx: &CancellationToken, reader: &mut R) -> Result<Vec<u8>, FlowError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::new();
    tokio::select! {
        res = reader.read_to_end(&mut buf) => { res?; }
        _ = ctx.cancelled() => return Err(FlowError::Cancelled),
    }
    Ok(buf)
}
