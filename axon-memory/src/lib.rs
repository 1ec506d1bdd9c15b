#![deny(missing_docs)]
//! Streaming memory overlays for axon flows.
//!
//! Two overlays over a pluggable [`Store`](axon::Store):
//!
//! - [`Conversation`] keeps a role-tagged message log per key. Its
//!   [`input`](Conversation::input) handler records the user's message and
//!   emits the full transcript; its [`output`](Conversation::output)
//!   handler streams through while recording what it saw as the
//!   assistant's message.
//! - [`ContextWindow`] keeps a sliding transcript per key, bounded by an
//!   [approximate token count](approximate_tokens) and trimmed from the
//!   front at natural boundaries.
//!
//! Both default to an in-memory store and accept any `Arc<dyn Store>`.

mod context;
mod conversation;
mod tokens;

pub use context::{ContextInfo, ContextInput, ContextOutput, ContextWindow};
pub use conversation::{
    Conversation, ConversationInfo, ConversationInput, ConversationOutput, Message, Role,
};
pub use tokens::{approximate_tokens, trim_to_limit};
