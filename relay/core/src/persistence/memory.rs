//! In-memory store
//!
//! Keeps conversations and messages behind a single `RwLock`. Messages keep
//! their insertion order per conversation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use super::{ConversationStore, PersistenceSink, StoreError};
use crate::messages::{Conversation, ConversationId, Message, MessageId, MessagePatch, TeamId};

#[derive(Default)]
struct Tables {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, Message>,
    /// Per-conversation message order
    order: HashMap<ConversationId, Vec<MessageId>>,
}

impl Tables {
    fn insert_message(&mut self, message: Message) {
        if let Some(conv) = self.conversations.get_mut(&message.conversation_id) {
            conv.updated_at = Utc::now();
        }
        self.order
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.id.clone());
        self.messages.insert(message.id.clone(), message);
    }

    fn patch(&mut self, id: &MessageId, patch: &MessagePatch) -> Result<(), StoreError> {
        let message = self
            .messages
            .get_mut(id)
            .ok_or_else(|| StoreError::MessageNotFound(id.clone()))?;
        if !message.is_mutable() {
            return Err(StoreError::Immutable(id.clone()));
        }
        message.apply(patch);
        Ok(())
    }
}

/// Process-local store implementing every persistence seam
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one message
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<Message> {
        self.tables.read().messages.get(id).cloned()
    }

    /// Total number of stored messages
    #[must_use]
    pub fn message_count(&self) -> usize {
        self.tables.read().messages.len()
    }
}

#[async_trait]
impl PersistenceSink for InMemoryStore {
    async fn create_assistant_message(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<MessageId, StoreError> {
        let mut tables = self.tables.write();
        if !tables.conversations.contains_key(conversation_id) {
            return Err(StoreError::ConversationNotFound(conversation_id.clone()));
        }
        let message = Message::assistant_placeholder(conversation_id.clone());
        let id = message.id.clone();
        tables.insert_message(message);
        Ok(id)
    }

    async fn write_partial(&self, message_id: &MessageId, content: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .patch(message_id, &MessagePatch::partial(content))
    }

    async fn write_final(&self, message_id: &MessageId, content: &str) -> Result<(), StoreError> {
        self.tables
            .write()
            .patch(message_id, &MessagePatch::terminal(content))
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn create_conversation(&self, team_id: &TeamId) -> Result<Conversation, StoreError> {
        let conversation = Conversation::new(team_id.clone());
        self.tables
            .write()
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    async fn get_conversation(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        self.tables
            .read()
            .conversations
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::ConversationNotFound(id.clone()))
    }

    async fn list_conversations(&self, team_id: &TeamId) -> Result<Vec<Conversation>, StoreError> {
        let mut list: Vec<Conversation> = self
            .tables
            .read()
            .conversations
            .values()
            .filter(|c| &c.team_id == team_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(list)
    }

    async fn delete_conversation(&self, id: &ConversationId) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.conversations.remove(id).is_none() {
            return Err(StoreError::ConversationNotFound(id.clone()));
        }
        for message_id in tables.order.remove(id).unwrap_or_default() {
            tables.messages.remove(&message_id);
        }
        Ok(())
    }

    async fn set_title(&self, id: &ConversationId, title: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let conversation = tables
            .conversations
            .get_mut(id)
            .ok_or_else(|| StoreError::ConversationNotFound(id.clone()))?;
        conversation.title = title.to_string();
        conversation.title_loading = false;
        Ok(())
    }

    async fn insert_user_message(
        &self,
        id: &ConversationId,
        content: &str,
    ) -> Result<Message, StoreError> {
        let mut tables = self.tables.write();
        if !tables.conversations.contains_key(id) {
            return Err(StoreError::ConversationNotFound(id.clone()));
        }
        let message = Message::user(id.clone(), content);
        tables.insert_message(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let tables = self.tables.read();
        if !tables.conversations.contains_key(id) {
            return Err(StoreError::ConversationNotFound(id.clone()));
        }
        Ok(tables
            .order
            .get(id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|m| tables.messages.get(m).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn patch_message(&self, id: &MessageId, patch: &MessagePatch) -> Result<(), StoreError> {
        self.tables.write().patch(id, patch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::MessageRole;
    use pretty_assertions::assert_eq;

    async fn store_with_conversation() -> (InMemoryStore, Conversation) {
        let store = InMemoryStore::new();
        let conv = store
            .create_conversation(&TeamId::from("team-a"))
            .await
            .unwrap();
        (store, conv)
    }

    #[tokio::test]
    async fn test_assistant_message_lifecycle() {
        let (store, conv) = store_with_conversation().await;
        let id = store.create_assistant_message(&conv.id).await.unwrap();

        store.write_partial(&id, "Hello, ").await.unwrap();
        let msg = store.message(&id).unwrap();
        assert_eq!(msg.content, "Hello, ");
        assert!(msg.streaming);

        store.write_final(&id, "Hello, world!").await.unwrap();
        let msg = store.message(&id).unwrap();
        assert_eq!(msg.content, "Hello, world!");
        assert!(msg.completed);
        assert!(!msg.streaming);
    }

    #[tokio::test]
    async fn test_completed_message_is_immutable() {
        let (store, conv) = store_with_conversation().await;
        let id = store.create_assistant_message(&conv.id).await.unwrap();
        store.write_final(&id, "done").await.unwrap();

        assert_eq!(
            store.write_partial(&id, "late").await,
            Err(StoreError::Immutable(id.clone()))
        );
        assert_eq!(
            store.write_final(&id, "again").await,
            Err(StoreError::Immutable(id.clone()))
        );
        assert_eq!(store.message(&id).unwrap().content, "done");
    }

    #[tokio::test]
    async fn test_unknown_ids() {
        let store = InMemoryStore::new();
        let missing = ConversationId::from("nope");
        assert!(matches!(
            store.create_assistant_message(&missing).await,
            Err(StoreError::ConversationNotFound(_))
        ));
        assert!(matches!(
            store.write_partial(&MessageId::from("x"), "a").await,
            Err(StoreError::MessageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_messages_keep_insertion_order() {
        let (store, conv) = store_with_conversation().await;
        store.insert_user_message(&conv.id, "first").await.unwrap();
        let reply = store.create_assistant_message(&conv.id).await.unwrap();
        store.insert_user_message(&conv.id, "second").await.unwrap();

        let messages = store.list_messages(&conv.id).await.unwrap();
        let roles: Vec<MessageRole> = messages.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![MessageRole::User, MessageRole::Assistant, MessageRole::User]
        );
        assert_eq!(messages[1].id, reply);
    }

    #[tokio::test]
    async fn test_conversations_scoped_by_team() {
        let store = InMemoryStore::new();
        store.create_conversation(&TeamId::from("a")).await.unwrap();
        store.create_conversation(&TeamId::from("a")).await.unwrap();
        store.create_conversation(&TeamId::from("b")).await.unwrap();

        assert_eq!(
            store
                .list_conversations(&TeamId::from("a"))
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_set_title_clears_loading() {
        let (store, conv) = store_with_conversation().await;
        store.set_title(&conv.id, "Rust questions").await.unwrap();
        let conv = store.get_conversation(&conv.id).await.unwrap();
        assert_eq!(conv.title, "Rust questions");
        assert!(!conv.title_loading);
    }

    #[tokio::test]
    async fn test_delete_removes_messages() {
        let (store, conv) = store_with_conversation().await;
        store.insert_user_message(&conv.id, "hi").await.unwrap();
        store.delete_conversation(&conv.id).await.unwrap();

        assert_eq!(store.message_count(), 0);
        assert!(store.get_conversation(&conv.id).await.is_err());
    }
}
