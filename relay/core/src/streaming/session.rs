//! Stream session state
//!
//! Per-invocation state of the driver: which message is being written, how
//! far the response got, and how it ended.

use std::time::{Duration, Instant};

use crate::messages::{ConversationId, MessageId};

/// Lifecycle of one driver invocation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    /// Chunks are being consumed
    Reading,
    /// Provider completed the response
    Done,
    /// Provider failed or disconnected
    Error(String),
    /// Consumption was stopped by the caller
    Cancelled,
}

impl SessionPhase {
    /// Whether the session reached an end state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Reading)
    }
}

/// State for one streamed assistant message
#[derive(Debug)]
pub struct StreamSession {
    /// Conversation the response belongs to
    pub conversation_id: ConversationId,
    /// Persisted assistant message
    pub message_id: MessageId,
    /// Current phase
    pub phase: SessionPhase,
    /// Chunks received
    pub chunks: u32,
    /// Partial writes handed to the writer
    pub partial_writes: u32,
    started_at: Instant,
}

impl StreamSession {
    /// Start a session for an already-created message
    #[must_use]
    pub fn new(conversation_id: ConversationId, message_id: MessageId) -> Self {
        Self {
            conversation_id,
            message_id,
            phase: SessionPhase::Reading,
            chunks: 0,
            partial_writes: 0,
            started_at: Instant::now(),
        }
    }

    /// Move to an end state; only the first transition sticks
    pub fn end(&mut self, phase: SessionPhase) {
        if !self.phase.is_terminal() {
            self.phase = phase;
        }
    }

    /// Time since the session started
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}
