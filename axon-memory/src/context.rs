//! Sliding-window context buffer over a pluggable store.

use std::sync::Arc;

use async_trait::async_trait;
use axon::{FlowError, Handler, Request, Response, Store};
use axon_store_memory::MemoryStore;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

use crate::tokens::{approximate_tokens, trim_to_limit};

#[derive(Debug, Default, Serialize, Deserialize)]
struct ContextRecord {
    max_tokens: usize,
    content: Vec<u8>,
}

/// Summary of one stored context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextInfo {
    /// Approximate token count of the stored content.
    pub token_count: usize,
    /// The window limit the content is trimmed to.
    pub max_tokens: usize,
    /// Whether a record exists for the key.
    pub exists: bool,
}

/// Sliding-window context memory over a pluggable [`Store`].
///
/// One transcript per key, bounded by an approximate token count. Appends
/// go to the back; when the limit is exceeded the front is trimmed at a
/// natural boundary. Content is raw bytes and never role-tagged.
#[derive(Clone)]
pub struct ContextWindow {
    store: Arc<dyn Store>,
}

impl ContextWindow {
    /// Context memory over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Context memory over the given store.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Handler that appends its input to the window under `key` and emits
    /// the prior content plus the input downstream.
    pub fn input(&self, key: impl Into<String>, max_tokens: usize) -> ContextInput {
        ContextInput {
            store: Arc::clone(&self.store),
            key: key.into(),
            max_tokens,
        }
    }

    /// Handler that streams its input through while appending the observed
    /// bytes to the window under `key` as an `Assistant:` line.
    pub fn output(&self, key: impl Into<String>, max_tokens: usize) -> ContextOutput {
        ContextOutput {
            store: Arc::clone(&self.store),
            key: key.into(),
            max_tokens,
        }
    }

    /// Token count, limit, and existence for `key`.
    pub async fn info(&self, key: &str) -> Result<ContextInfo, FlowError> {
        match load_record(&self.store, key).await? {
            Some(record) => Ok(ContextInfo {
                token_count: approximate_tokens(&record.content),
                max_tokens: record.max_tokens,
                exists: true,
            }),
            None => Ok(ContextInfo {
                token_count: 0,
                max_tokens: 0,
                exists: false,
            }),
        }
    }

    /// Delete the record for `key`.
    pub async fn clear(&self, key: &str) -> Result<(), FlowError> {
        self.store
            .delete(key)
            .await
            .map_err(|e| FlowError::store("delete", e))
    }

    /// Snapshot of keys in the backing store.
    pub async fn list_keys(&self) -> Result<Vec<String>, FlowError> {
        self.store
            .list()
            .await
            .map_err(|e| FlowError::store("list", e))
    }
}

impl Default for ContextWindow {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_record(
    store: &Arc<dyn Store>,
    key: &str,
) -> Result<Option<ContextRecord>, FlowError> {
    let bytes = store.get(key).await.map_err(|e| FlowError::store("get", e))?;
    match bytes {
        Some(bytes) => {
            let record = serde_json::from_slice(&bytes)
                .map_err(|e| FlowError::Serialization(e.to_string()))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

async fn save_record(
    store: &Arc<dyn Store>,
    key: &str,
    record: &ContextRecord,
) -> Result<(), FlowError> {
    let bytes =
        serde_json::to_vec(record).map_err(|e| FlowError::Serialization(e.to_string()))?;
    store
        .set(key, &bytes)
        .await
        .map_err(|e| FlowError::store("set", e))
}

/// Handler side of [`ContextWindow::input`].
pub struct ContextInput {
    store: Arc<dyn Store>,
    key: String,
    max_tokens: usize,
}

#[async_trait]
impl Handler for ContextInput {
    async fn serve(&self, mut req: Request, mut res: Response) -> Result<(), FlowError> {
        let input = req.read_all().await?;
        let input = input.trim_ascii();
        if input.is_empty() {
            return Err(FlowError::EmptyInput);
        }

        let mut record = load_record(&self.store, &self.key).await?.unwrap_or_default();

        let mut out = Vec::new();
        if !record.content.is_empty() {
            out.extend_from_slice(&record.content);
            out.push(b'\n');
        }
        out.extend_from_slice(input);
        res.write_all(&out).await?;

        record.content.extend_from_slice(input);
        record.content.push(b'\n');
        record.max_tokens = self.max_tokens;
        record.content = trim_to_limit(std::mem::take(&mut record.content), self.max_tokens);
        tracing::debug!(
            key = %self.key,
            tokens = approximate_tokens(&record.content),
            "appended input to context window"
        );
        save_record(&self.store, &self.key, &record).await
    }
}

/// Handler side of [`ContextWindow::output`].
pub struct ContextOutput {
    store: Arc<dyn Store>,
    key: String,
    max_tokens: usize,
}

#[async_trait]
impl Handler for ContextOutput {
    async fn serve(&self, req: Request, mut res: Response) -> Result<(), FlowError> {
        let (ctx, _attachments, mut reader) = req.into_parts();

        // Stream through while keeping a copy of everything observed.
        let mut seen = Vec::new();
        let mut buf = vec![0u8; 8 * 1024];
        loop {
            let n = tokio::select! {
                read = reader.read(&mut buf) => read?,
                _ = ctx.cancelled() => return Err(FlowError::Cancelled),
            };
            if n == 0 {
                break;
            }
            res.write_all(&buf[..n]).await?;
            seen.extend_from_slice(&buf[..n]);
        }
        res.flush().await?;

        if seen.is_empty() {
            return Ok(());
        }
        let mut record = load_record(&self.store, &self.key).await?.unwrap_or_default();
        record.content.extend_from_slice(b"Assistant: ");
        record.content.extend_from_slice(&seen);
        record.content.push(b'\n');
        record.max_tokens = self.max_tokens;
        record.content = trim_to_limit(std::mem::take(&mut record.content), self.max_tokens);
        tracing::debug!(
            key = %self.key,
            tokens = approximate_tokens(&record.content),
            "appended response to context window"
        );
        save_record(&self.store, &self.key, &record).await
    }
}
