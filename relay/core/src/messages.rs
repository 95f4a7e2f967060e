//! Conversation Data Model
//!
//! Identifiers, messages and conversations shared by the server-side
//! driver, the persistence layer and the client-side registry.
//!
//! # Lifecycle
//!
//! An assistant message is created empty with `streaming = true,
//! completed = false`, patched any number of times while it streams, and
//! finalized exactly once (`streaming = false, completed = true`). After
//! that it is immutable. User messages are stored already complete.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Message identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub String);

impl MessageId {
    /// Generate a new unique message ID
    #[must_use]
    pub fn new() -> Self {
        Self(format!("msg_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    /// Generate a new unique conversation ID
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Team identifier (teams own conversations)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamId(pub String);

impl fmt::Display for TeamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TeamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Who sent a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Human input
    User,
    /// Model reply
    Assistant,
}

impl MessageRole {
    /// Wire name used by chat-completion APIs
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// A message in a conversation
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: MessageId,
    /// Owning conversation
    pub conversation_id: ConversationId,
    /// Who sent this message
    pub role: MessageRole,
    /// Message content
    pub content: String,
    /// Whether the content may still grow
    pub streaming: bool,
    /// Whether the message reached its terminal state
    pub completed: bool,
    /// When the message was created
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Create a complete user message
    pub fn user(conversation_id: ConversationId, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            role: MessageRole::User,
            content: content.into(),
            streaming: false,
            completed: true,
            created_at: Utc::now(),
        }
    }

    /// Create an empty assistant message that is about to stream
    #[must_use]
    pub fn assistant_placeholder(conversation_id: ConversationId) -> Self {
        Self {
            id: MessageId::new(),
            conversation_id,
            role: MessageRole::Assistant,
            content: String::new(),
            streaming: true,
            completed: false,
            created_at: Utc::now(),
        }
    }

    /// Replace the generated ID (client-side placeholders use their own scheme)
    #[must_use]
    pub fn with_id(mut self, id: MessageId) -> Self {
        self.id = id;
        self
    }

    /// Whether further content updates are allowed
    #[must_use]
    pub fn is_mutable(&self) -> bool {
        self.streaming && !self.completed
    }

    /// Copy of this message with `text` appended
    #[must_use]
    pub fn appended(&self, text: &str) -> Self {
        let mut next = self.clone();
        next.content.push_str(text);
        next
    }

    /// Apply a persistence patch
    pub fn apply(&mut self, patch: &MessagePatch) {
        self.content.clone_from(&patch.content);
        self.streaming = patch.streaming;
        self.completed = patch.completed;
    }
}

/// Content/flag update for a stored message
///
/// Every patch fully overwrites the content; last write wins.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagePatch {
    /// Full message content
    pub content: String,
    /// Whether the message keeps streaming after this write
    pub streaming: bool,
    /// Whether this write is terminal
    pub completed: bool,
}

impl MessagePatch {
    /// Intermediate write while the response is still streaming
    pub fn partial(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            streaming: true,
            completed: false,
        }
    }

    /// Terminal write; the message becomes immutable
    pub fn terminal(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            streaming: false,
            completed: true,
        }
    }
}

/// Title shown until the generated one is patched in
pub const PLACEHOLDER_TITLE: &str = "New Conversation";

/// A conversation owned by a team
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,
    /// Owning team
    pub team_id: TeamId,
    /// Display title
    pub title: String,
    /// Whether a generated title is still pending
    pub title_loading: bool,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// Bumped whenever a message is added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a conversation with the placeholder title
    #[must_use]
    pub fn new(team_id: TeamId) -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            team_id,
            title: PLACEHOLDER_TITLE.to_string(),
            title_loading: true,
            created_at: now,
            updated_at: now,
        }
    }
}
