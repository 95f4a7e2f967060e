//! Persisted history for the registry

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::messages::{ConversationId, Message};
use crate::persistence::{ConversationStore, InMemoryStore, StoreError};

/// Errors fetching persisted history
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Conversation does not exist
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),
    /// Backend could not be reached or returned garbage
    #[error("history unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for HistoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConversationNotFound(id) => Self::NotFound(id),
            other => Self::Unavailable(other.to_string()),
        }
    }
}

/// Where the registry loads persisted messages from
#[async_trait]
pub trait HistorySource: Send + Sync {
    /// All persisted messages of a conversation, oldest first
    async fn fetch_messages(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError>;
}

/// Exposes any [`ConversationStore`] as a [`HistorySource`]
pub struct StoreHistory {
    store: Arc<dyn ConversationStore>,
}

impl StoreHistory {
    /// Wrap a store
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HistorySource for StoreHistory {
    async fn fetch_messages(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        Ok(self.store.list_messages(id).await?)
    }
}

#[async_trait]
impl HistorySource for InMemoryStore {
    async fn fetch_messages(&self, id: &ConversationId) -> Result<Vec<Message>, HistoryError> {
        Ok(self.list_messages(id).await?)
    }
}
