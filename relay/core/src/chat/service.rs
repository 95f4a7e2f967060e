//! Chat service

use std::sync::Arc;

use futures::stream::{self, BoxStream};
use futures::StreamExt;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use super::title::TitleGenerator;
use crate::backend::{ChatTurn, LlmBackend, LlmRequest, StreamingToken};
use crate::config::RelayConfig;
use crate::messages::{Conversation, ConversationId, Message, MessageId, TeamId};
use crate::persistence::{ConversationStore, PersistenceSink, StoreError};
use crate::streaming::{DriverConfig, DriverError, ResponseOutcome, StreamDriver};
use crate::transport::{relay_channel, ByteTransport};

/// Chat service errors
#[derive(Debug, Error)]
pub enum ChatError {
    /// Message content is empty or whitespace
    #[error("message is empty")]
    EmptyMessage,
    /// The target conversation does not exist
    #[error("conversation not found: {0}")]
    ConversationNotFound(ConversationId),
    /// Storage failed
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// A user message to send
#[derive(Clone, Debug)]
pub struct SendMessage {
    /// Team the conversation belongs to
    pub team_id: TeamId,
    /// Existing conversation, or `None` to start a new one
    pub conversation_id: Option<ConversationId>,
    /// Message text
    pub content: String,
}

impl SendMessage {
    /// Message starting a new conversation
    pub fn new_conversation(team_id: TeamId, content: impl Into<String>) -> Self {
        Self {
            team_id,
            conversation_id: None,
            content: content.into(),
        }
    }

    /// Message in an existing conversation
    pub fn reply(team_id: TeamId, conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            team_id,
            conversation_id: Some(conversation_id),
            content: content.into(),
        }
    }
}

/// What [`ChatService::send_message`] hands back
pub struct SendReceipt {
    /// Conversation the message went to (new or existing)
    pub conversation_id: ConversationId,
    /// Stored user message
    pub user_message_id: MessageId,
    /// Live chunks of the assistant response
    pub transport: ByteTransport,
    /// Stops the response early; the text so far is still stored
    pub cancel: CancellationToken,
    /// Background response task
    pub response: JoinHandle<Result<ResponseOutcome, DriverError>>,
}

/// Sends messages and schedules assistant responses
pub struct ChatService {
    store: Arc<dyn ConversationStore>,
    backend: Arc<dyn LlmBackend>,
    driver: StreamDriver,
    titles: Arc<TitleGenerator>,
    model: String,
    system_prompt: Option<String>,
}

impl ChatService {
    /// Create a service over one store that is both the conversation store
    /// and the persistence sink
    pub fn new<S>(store: Arc<S>, backend: Arc<dyn LlmBackend>, config: &RelayConfig) -> Self
    where
        S: ConversationStore + PersistenceSink + 'static,
    {
        let conversations: Arc<dyn ConversationStore> = store.clone();
        let sink: Arc<dyn PersistenceSink> = store;
        Self::with_parts(conversations, sink, backend, config)
    }

    /// Create a service from separate store and sink
    pub fn with_parts(
        store: Arc<dyn ConversationStore>,
        sink: Arc<dyn PersistenceSink>,
        backend: Arc<dyn LlmBackend>,
        config: &RelayConfig,
    ) -> Self {
        let titles = Arc::new(TitleGenerator::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            config.provider.model.clone(),
            config.titles.clone(),
        ));
        Self {
            store,
            backend,
            driver: StreamDriver::new(sink, DriverConfig::from(&config.streaming)),
            titles,
            model: config.provider.model.clone(),
            system_prompt: config.provider.system_prompt.clone(),
        }
    }

    /// Store a user message and start streaming the assistant response
    pub async fn send_message(&self, request: SendMessage) -> Result<SendReceipt, ChatError> {
        let content = request.content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }

        let conversation_id = match request.conversation_id {
            Some(id) => {
                self.conversation(&id).await?;
                id
            }
            None => {
                let conversation = self.store.create_conversation(&request.team_id).await?;
                tracing::info!(
                    conversation_id = %conversation.id,
                    team_id = %request.team_id,
                    "Conversation created"
                );
                self.titles
                    .spawn(conversation.id.clone(), content.to_string());
                conversation.id
            }
        };

        let user_message = self
            .store
            .insert_user_message(&conversation_id, content)
            .await?;
        let llm_request = self.build_request(&conversation_id, &user_message.id).await?;

        let (relay, transport) = relay_channel();
        let cancel = CancellationToken::new();

        let response = {
            let backend = Arc::clone(&self.backend);
            let driver = self.driver.clone();
            let conversation_id = conversation_id.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let tokens = open_stream(backend.as_ref(), &llm_request).await;
                driver
                    .drive(&conversation_id, tokens, Some(relay), Some(cancel))
                    .await
            })
        };

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %user_message.id,
            "User message stored, response scheduled"
        );

        Ok(SendReceipt {
            conversation_id,
            user_message_id: user_message.id,
            transport,
            cancel,
            response,
        })
    }

    /// Conversations of a team, most recent first
    pub async fn list_conversations(&self, team_id: &TeamId) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.store.list_conversations(team_id).await?)
    }

    /// One conversation
    pub async fn conversation(&self, id: &ConversationId) -> Result<Conversation, ChatError> {
        self.store.get_conversation(id).await.map_err(|e| match e {
            StoreError::ConversationNotFound(id) => ChatError::ConversationNotFound(id),
            other => ChatError::Store(other),
        })
    }

    /// Messages of a conversation in order
    pub async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, ChatError> {
        Ok(self.store.list_messages(id).await?)
    }

    /// Delete a conversation and its messages
    pub async fn delete_conversation(&self, id: &ConversationId) -> Result<(), ChatError> {
        Ok(self.store.delete_conversation(id).await?)
    }

    /// History up to and including `last`, as provider turns
    async fn build_request(
        &self,
        conversation_id: &ConversationId,
        last: &MessageId,
    ) -> Result<LlmRequest, ChatError> {
        let messages = self.store.list_messages(conversation_id).await?;
        let end = messages
            .iter()
            .position(|m| &m.id == last)
            .map_or(messages.len(), |i| i + 1);

        let turns: Vec<ChatTurn> = messages[..end]
            .iter()
            .filter(|m| !m.content.is_empty())
            .map(ChatTurn::from)
            .collect();

        let mut request = LlmRequest::new(turns, &self.model);
        if let Some(ref system) = self.system_prompt {
            request = request.with_system(system);
        }
        Ok(request)
    }
}

/// Provider token stream; an open failure becomes a single `Error` event
async fn open_stream(
    backend: &dyn LlmBackend,
    request: &LlmRequest,
) -> BoxStream<'static, StreamingToken> {
    match backend.send_streaming(request).await {
        Ok(rx) => ReceiverStream::new(rx).boxed(),
        Err(e) => {
            tracing::warn!(backend = backend.name(), error = %e, "Failed to open provider stream");
            stream::iter(vec![StreamingToken::Error(e.to_string())]).boxed()
        }
    }
}
