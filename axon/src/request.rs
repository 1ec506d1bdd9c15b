//! Request/response envelopes and the per-call attachments carry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::error::FlowError;
use crate::stream::{self, BoxReader, BoxWriter};

/// Type-keyed, thread-safe map of per-call attachments.
///
/// Cloning is cheap and shares the underlying map. The flow engine creates
/// one map per run, and [`Chain`](crate::middleware::Chain) hands the same
/// handle to every link, so a value attached by one handler (a tool
/// registry, say) is visible to the handlers after it.
#[derive(Clone, Default)]
pub struct Attachments {
    inner: Arc<Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,
}

impl Attachments {
    /// Create an empty attachments map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a value, replacing any previous value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) {
        self.inner
            .lock()
            .expect("attachments lock poisoned")
            .insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Fetch an attachment by type.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .lock()
            .expect("attachments lock poisoned")
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Remove an attachment by type, returning it if present.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.inner
            .lock()
            .expect("attachments lock poisoned")
            .remove(&TypeId::of::<T>())
            .and_then(|any| any.downcast::<T>().ok())
    }

    /// Whether an attachment of the given type is present.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.inner
            .lock()
            .expect("attachments lock poisoned")
            .contains_key(&TypeId::of::<T>())
    }
}

/// The readable half of one handler call: the input stream plus the call's
/// cancellation context and attachments.
pub struct Request {
    ctx: CancellationToken,
    attachments: Attachments,
    reader: BoxReader,
}

impl Request {
    /// Create a request with a fresh attachments map.
    pub fn new(ctx: CancellationToken, reader: BoxReader) -> Self {
        Self::with_attachments(ctx, reader, Attachments::new())
    }

    /// Create a request that shares an existing attachments map.
    pub fn with_attachments(
        ctx: CancellationToken,
        reader: BoxReader,
        attachments: Attachments,
    ) -> Self {
        Self {
            ctx,
            attachments,
            reader,
        }
    }

    /// The cancellation token governing this call.
    ///
    /// This is the authoritative signal: every blocking operation a handler
    /// performs must observe it.
    pub fn context(&self) -> &CancellationToken {
        &self.ctx
    }

    /// Replace the cancellation token, keeping stream and attachments.
    ///
    /// Used by scoping middleware such as
    /// [`Timeout`](crate::middleware::Timeout) to hand the wrapped handler
    /// a token it can cancel independently.
    pub fn with_context(mut self, ctx: CancellationToken) -> Self {
        self.ctx = ctx;
        self
    }

    /// Per-call attachments, shared with sibling handlers in the same run.
    pub fn attachments(&self) -> &Attachments {
        &self.attachments
    }

    /// The raw readable stream.
    pub fn reader(&mut self) -> &mut BoxReader {
        &mut self.reader
    }

    /// Split this request into its parts.
    pub fn into_parts(self) -> (CancellationToken, Attachments, BoxReader) {
        (self.ctx, self.attachments, self.reader)
    }

    /// Read the whole input stream, observing cancellation.
    pub async fn read_all(&mut self) -> Result<Vec<u8>, FlowError> {
        let Self { ctx, reader, .. } = self;
        stream::read_all(ctx, reader).await
    }
}

/// The writable half of one handler call.
///
/// Dropping the response closes the underlying stream, which signals
/// end-of-stream to whatever is reading it.
pub struct Response {
    writer: BoxWriter,
}

impl Response {
    /// Wrap a writable stream.
    pub fn new(writer: BoxWriter) -> Self {
        Self { writer }
    }

    /// The raw writable stream.
    pub fn writer(&mut self) -> &mut BoxWriter {
        &mut self.writer
    }

    /// Consume the response, returning the writer.
    pub fn into_writer(self) -> BoxWriter {
        self.writer
    }

    /// Write a full buffer to the response.
    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), FlowError> {
        self.writer.write_all(bytes).await?;
        Ok(())
    }

    /// Flush buffered bytes through to the reader side.
    pub async fn flush(&mut self) -> Result<(), FlowError> {
        self.writer.flush().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Registry {
        tools: Vec<&'static str>,
    }

    #[test]
    fn attachments_roundtrip_by_type() {
        let attachments = Attachments::new();
        attachments.insert(Registry {
            tools: vec!["search"],
        });

        let registry = attachments.get::<Registry>().unwrap();
        assert_eq!(registry.tools, vec!["search"]);
        assert!(attachments.contains::<Registry>());
        assert!(attachments.get::<String>().is_none());
    }

    #[test]
    fn attachments_clone_shares_state() {
        let attachments = Attachments::new();
        let alias = attachments.clone();
        alias.insert(7u32);

        assert_eq!(*attachments.get::<u32>().unwrap(), 7);
        attachments.remove::<u32>();
        assert!(!alias.contains::<u32>());
    }

    #[test]
    fn attachments_insert_replaces() {
        let attachments = Attachments::new();
        attachments.insert(1u64);
        attachments.insert(2u64);
        assert_eq!(*attachments.get::<u64>().unwrap(), 2);
    }
}
