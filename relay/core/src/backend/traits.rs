//! LLM Backend Traits
//!
//! Trait definitions for model providers. The driver only ever sees a stream
//! of [`StreamingToken`]s, so providers can be swapped without touching the
//! coordination core.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::messages::{Message, MessageRole};

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A text delta
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (may differ from concatenated tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// One turn of chat history sent to the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatTurn {
    /// Who said it
    pub role: MessageRole,
    /// What was said
    pub content: String,
}

impl ChatTurn {
    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Configuration for LLM requests
#[derive(Clone, Debug)]
pub struct LlmRequest {
    /// Conversation so far, oldest first
    pub messages: Vec<ChatTurn>,
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Whether to stream the response
    pub stream: bool,
    /// Maximum tokens in response (0 = default)
    pub max_tokens: u32,
    /// Temperature (0.0-1.0, higher = more creative)
    pub temperature: f32,
    /// System prompt (optional, sent before the history)
    pub system: Option<String>,
}

impl Default for LlmRequest {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
            model: String::new(),
            stream: true,
            max_tokens: 0,
            temperature: 0.7,
            system: None,
        }
    }
}

impl LlmRequest {
    /// Create a new request from history and model
    pub fn new(messages: Vec<ChatTurn>, model: impl Into<String>) -> Self {
        Self {
            messages,
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set streaming mode
    #[must_use]
    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature.clamp(0.0, 1.0);
        self
    }

    /// Set system prompt
    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// History with the system prompt (if any) as a leading `(role, content)` pair
    #[must_use]
    pub fn wire_messages(&self) -> Vec<(&'static str, &str)> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if let Some(ref system) = self.system {
            out.push(("system", system.as_str()));
        }
        out.extend(
            self.messages
                .iter()
                .map(|turn| (turn.role.as_str(), turn.content.as_str())),
        );
        out
    }
}

/// Response from non-streaming LLM request
#[derive(Clone, Debug)]
pub struct LlmResponse {
    /// The response text
    pub content: String,
    /// Model that generated the response
    pub model: String,
    /// Tokens used (if available)
    pub tokens_used: Option<u32>,
    /// Response generation time in milliseconds
    pub duration_ms: Option<u64>,
}

/// LLM Backend trait
///
/// Implement this trait to add support for different LLM providers.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "OpenRouter", "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that yields tokens as they arrive and ends
    /// with exactly one `Complete` or `Error`.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// Send a request and wait for complete response (non-streaming)
    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse>;
}
