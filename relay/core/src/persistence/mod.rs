//! Persistence
//!
//! Two seams over durable storage:
//!
//! - [`PersistenceSink`]: the narrow write surface the stream driver uses
//!   for one assistant message (create, partial writes, terminal write).
//! - [`ConversationStore`]: conversation and message CRUD used by the chat
//!   service and the history loader.
//!
//! Both are async traits so a database-backed store can replace
//! [`InMemoryStore`] without touching the driver.

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::{Conversation, ConversationId, Message, MessageId, MessagePatch, TeamId};

pub use memory::InMemoryStore;

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No message with this id
    #[error("message not found: {0}")]
    MessageNotFound(MessageId),
    /// No conversation with this id
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
    /// The message already received its terminal write
    #[error("message {0} is complete and can no longer be modified")]
    Immutable(MessageId),
    /// Backing store is unreachable or refused the operation
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Write surface for one streamed assistant message
///
/// Every write fully overwrites the stored content (last write wins).
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Create an empty, streaming assistant message
    async fn create_assistant_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<MessageId, StoreError>;

    /// Best-effort intermediate write (`streaming = true, completed = false`)
    async fn write_partial(&self, message_id: &MessageId, content: &str) -> Result<(), StoreError>;

    /// Terminal write (`streaming = false, completed = true`)
    ///
    /// Issued exactly once per response; the message is immutable afterwards.
    async fn write_final(&self, message_id: &MessageId, content: &str) -> Result<(), StoreError>;
}

/// Conversation and message storage
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a conversation with the placeholder title
    async fn create_conversation(&self, team_id: &TeamId) -> Result<Conversation, StoreError>;

    /// Fetch one conversation
    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError>;

    /// Conversations of a team, most recently updated first
    async fn list_conversations(&self, team_id: &TeamId) -> Result<Vec<Conversation>, StoreError>;

    /// Delete a conversation and all its messages
    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError>;

    /// Set the title and clear `title_loading`
    async fn set_title(&self, id: &ConversationId, title: &str) -> Result<(), StoreError>;

    /// Insert a complete user message
    async fn insert_user_message(
        &self,
        id: &ConversationId,
        content: &str,
    ) -> Result<Message, StoreError>;

    /// Messages of a conversation in insertion order
    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError>;

    /// Apply a raw patch to a message
    async fn patch_message(&self, id: &MessageId, patch: &MessagePatch) -> Result<(), StoreError>;
}
