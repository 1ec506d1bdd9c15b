//! Role-tagged conversation log over a pluggable store.

use std::sync::Arc;

use async_trait::async_trait;
use axon::{FlowError, Handler, Request, Response, Store};
use axon_store_memory::MemoryStore;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;

/// The author of a conversation message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A human user.
    User,
    /// The AI assistant.
    Assistant,
    /// A system message.
    System,
}

impl Role {
    /// Lowercase wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Who authored the message.
    pub role: Role,
    /// Raw message bytes (binary-safe).
    pub content: Vec<u8>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConversationRecord {
    messages: Vec<Message>,
}

/// Summary of one stored conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationInfo {
    /// Number of stored messages.
    pub message_count: usize,
    /// Whether a record exists for the key.
    pub exists: bool,
}

/// Role-tagged conversation memory over a pluggable [`Store`].
///
/// One record per key, append-only within the key. The hot path is the
/// pair of handlers from [`input`](Conversation::input) and
/// [`output`](Conversation::output); `info`, `clear`, and `list_keys` are
/// observability helpers.
#[derive(Clone)]
pub struct Conversation {
    store: Arc<dyn Store>,
}

impl Conversation {
    /// Conversation memory over a fresh in-memory store.
    pub fn new() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    /// Conversation memory over the given store.
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Handler that records user input under `key` and emits the full
    /// transcript, ending with the new `user:` line, downstream.
    pub fn input(&self, key: impl Into<String>) -> ConversationInput {
        ConversationInput {
            store: Arc::clone(&self.store),
            key: key.into(),
        }
    }

    /// Handler that streams its input through while recording the observed
    /// bytes as an `assistant` message under `key`.
    pub fn output(&self, key: impl Into<String>) -> ConversationOutput {
        ConversationOutput {
            store: Arc::clone(&self.store),
            key: key.into(),
        }
    }

    /// Message count and existence for `key`.
    pub async fn info(&self, key: &str) -> Result<ConversationInfo, FlowError> {
        match load_record(&self.store, key).await? {
            Some(record) => Ok(ConversationInfo {
                message_count: record.messages.len(),
                exists: true,
            }),
            None => Ok(ConversationInfo {
                message_count: 0,
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

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

async fn load_record(
    store: &Arc<dyn Store>,
    key: &str,
) -> Result<Option<ConversationRecord>, FlowError> {
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
    record: &ConversationRecord,
) -> Result<(), FlowError> {
    let bytes =
        serde_json::to_vec(record).map_err(|e| FlowError::Serialization(e.to_string()))?;
    store
        .set(key, &bytes)
        .await
        .map_err(|e| FlowError::store("set", e))
}

/// Handler side of [`Conversation::input`].
pub struct ConversationInput {
    store: Arc<dyn Store>,
    key: String,
}

#[async_trait]
impl Handler for ConversationInput {
    async fn serve(&self, mut req: Request, mut res: Response) -> Result<(), FlowError> {
        let input = req.read_all().await?;
        let input = input.trim_ascii();
        if input.is_empty() {
            return Err(FlowError::EmptyInput);
        }

        let mut record = load_record(&self.store, &self.key).await?.unwrap_or_default();

        let mut transcript = Vec::new();
        for message in &record.messages {
            transcript.extend_from_slice(message.role.as_str().as_bytes());
            transcript.extend_from_slice(b": ");
            transcript.extend_from_slice(&message.content);
            transcript.push(b'\n');
        }
        transcript.extend_from_slice(b"user: ");
        transcript.extend_from_slice(input);
        res.write_all(&transcript).await?;

        record.messages.push(Message {
            role: Role::User,
            content: input.to_vec(),
        });
        tracing::debug!(key = %self.key, messages = record.messages.len(), "recorded user message");
        save_record(&self.store, &self.key, &record).await
    }
}

/// Handler side of [`Conversation::output`].
pub struct ConversationOutput {
    store: Arc<dyn Store>,
    key: String,
}

#[async_trait]
impl Handler for ConversationOutput {
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
        record.messages.push(Message {
            role: Role::Assistant,
            content: seen,
        });
        tracing::debug!(key = %self.key, messages = record.messages.len(), "recorded assistant message");
        save_record(&self.store, &self.key, &record).await
    }
}
