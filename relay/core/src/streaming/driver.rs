//! Stream Driver
//!
//! Turns one provider token stream into one persisted assistant message:
//!
//! 1. create an empty assistant message through the sink
//! 2. accumulate chunks, relay them live, and hand flush-worthy snapshots
//!    to the detached writer
//! 3. issue exactly one awaited terminal write, whatever way the stream ended

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::accumulator::ResponseAccumulator;
use super::session::{SessionPhase, StreamSession};
use super::writer::PersistenceWriter;
use crate::backend::StreamingToken;
use crate::config::StreamingConfig;
use crate::delimiter::should_flush;
use crate::messages::{ConversationId, MessageId};
use crate::persistence::{PersistenceSink, StoreError};
use crate::transport::{ChunkRelay, TransportError};

/// Reason recorded when the provider stream stops without an end event
pub const ENDED_EARLY: &str = "stream ended before completion";

/// Driver settings
#[derive(Clone, Debug)]
pub struct DriverConfig {
    /// Persisted when the provider fails before sending any text
    pub failure_notice: String,
    /// Let the writer skip superseded queued partials
    pub writer_coalesce: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self::from(&StreamingConfig::default())
    }
}

impl From<&StreamingConfig> for DriverConfig {
    fn from(config: &StreamingConfig) -> Self {
        Self {
            failure_notice: config.failure_notice.clone(),
            writer_coalesce: config.writer_coalesce,
        }
    }
}

/// How a driven response ended, when it did not fail
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    /// Provider completed the response
    Completed,
    /// Caller cancelled; content is whatever arrived before that
    Cancelled,
}

/// Summary of one driven response
#[derive(Clone, Debug)]
pub struct ResponseOutcome {
    /// Persisted assistant message
    pub message_id: MessageId,
    /// Content of the terminal write
    pub content: String,
    /// How it ended
    pub status: ResponseStatus,
    /// Chunks received from the provider
    pub chunks: u32,
    /// Partial writes handed to the writer
    pub partial_writes: u32,
    /// Wall time from placeholder creation to terminal write
    pub elapsed: Duration,
}

/// Driver failures
#[derive(Debug, Error)]
pub enum DriverError {
    /// The placeholder message could not be created; nothing was persisted
    #[error("failed to create assistant message: {0}")]
    Create(#[source] StoreError),
    /// The terminal write failed; the message may be left streaming
    #[error("terminal write for {message_id} failed: {source}")]
    TerminalWrite {
        /// Affected message
        message_id: MessageId,
        /// Store failure
        #[source]
        source: StoreError,
    },
    /// The provider failed; the terminal write already succeeded
    #[error("provider failed for {message_id}: {reason}")]
    Provider {
        /// Affected message
        message_id: MessageId,
        /// Provider error text
        reason: String,
    },
}

enum Step {
    Cancelled,
    Event(Option<StreamingToken>),
}

/// Drives provider streams into persisted messages
#[derive(Clone)]
pub struct StreamDriver {
    sink: Arc<dyn PersistenceSink>,
    config: DriverConfig,
}

impl StreamDriver {
    /// Create a driver writing through `sink`
    pub fn new(sink: Arc<dyn PersistenceSink>, config: DriverConfig) -> Self {
        Self { sink, config }
    }

    /// Driver settings
    #[must_use]
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Drive one response to its terminal write
    ///
    /// `relay` receives every chunk as it arrives and is closed (or failed)
    /// once the terminal write is done. `cancel` stops consumption early;
    /// the buffer so far is still written as the final content.
    pub async fn drive<S>(
        &self,
        conversation_id: &ConversationId,
        tokens: S,
        relay: Option<ChunkRelay>,
        cancel: Option<CancellationToken>,
    ) -> Result<ResponseOutcome, DriverError>
    where
        S: Stream<Item = StreamingToken> + Send,
    {
        let message_id = self
            .sink
            .create_assistant_message(conversation_id)
            .await
            .map_err(DriverError::Create)?;

        tracing::info!(
            conversation_id = %conversation_id,
            message_id = %message_id,
            "Response stream started"
        );

        let cancel = cancel.unwrap_or_default();
        let mut session = StreamSession::new(conversation_id.clone(), message_id.clone());
        let mut acc = ResponseAccumulator::new();
        let writer = PersistenceWriter::spawn(
            Arc::clone(&self.sink),
            message_id.clone(),
            self.config.writer_coalesce,
        );

        futures::pin_mut!(tokens);

        while !session.phase.is_terminal() {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Cancelled,
                next = tokens.next() => Step::Event(next),
            };

            match step {
                Step::Cancelled => session.end(SessionPhase::Cancelled),
                Step::Event(Some(StreamingToken::Token(chunk))) => {
                    acc.append(&chunk);
                    session.chunks += 1;
                    if let Some(ref relay) = relay {
                        relay.send_chunk(&chunk);
                    }

                    let flush = should_flush(&chunk);
                    if flush {
                        if writer.enqueue_partial(acc.snapshot()) {
                            session.partial_writes += 1;
                        }
                        acc.mark_flushed();
                    }
                    tracing::debug!(
                        message_id = %message_id,
                        chunk_len = chunk.len(),
                        flush,
                        "Chunk received"
                    );
                }
                Step::Event(Some(StreamingToken::Complete { message })) => {
                    acc.finalize(message);
                    session.end(SessionPhase::Done);
                }
                Step::Event(Some(StreamingToken::Error(reason))) => {
                    session.end(SessionPhase::Error(reason));
                }
                Step::Event(None) => session.end(SessionPhase::Error(ENDED_EARLY.to_string())),
            }
        }

        let content = match session.phase {
            SessionPhase::Error(_) if acc.is_empty() => self.config.failure_notice.clone(),
            _ => acc.snapshot().to_string(),
        };

        if let Err(source) = writer.finish(&content).await {
            tracing::error!(
                conversation_id = %session.conversation_id,
                message_id = %message_id,
                error = %source,
                "Terminal write failed"
            );
            if let Some(relay) = relay {
                relay.fail(TransportError::Upstream(
                    "response could not be saved".to_string(),
                ));
            }
            return Err(DriverError::TerminalWrite { message_id, source });
        }

        let outcome = |status| ResponseOutcome {
            message_id: message_id.clone(),
            content: content.clone(),
            status,
            chunks: session.chunks,
            partial_writes: session.partial_writes,
            elapsed: session.elapsed(),
        };

        match session.phase {
            SessionPhase::Error(ref reason) => {
                tracing::warn!(
                    conversation_id = %session.conversation_id,
                    message_id = %message_id,
                    error = %reason,
                    chunks = session.chunks,
                    "Response failed, stored partial content"
                );
                if let Some(relay) = relay {
                    relay.fail(TransportError::Upstream(reason.clone()));
                }
                Err(DriverError::Provider {
                    message_id: message_id.clone(),
                    reason: reason.clone(),
                })
            }
            SessionPhase::Cancelled => {
                tracing::info!(
                    conversation_id = %session.conversation_id,
                    message_id = %message_id,
                    chunks = session.chunks,
                    unsaved_len = acc.unflushed_len(),
                    "Response cancelled"
                );
                if let Some(relay) = relay {
                    relay.fail(TransportError::Interrupted);
                }
                Ok(outcome(ResponseStatus::Cancelled))
            }
            SessionPhase::Done | SessionPhase::Reading => {
                tracing::info!(
                    conversation_id = %session.conversation_id,
                    message_id = %message_id,
                    chunks = session.chunks,
                    partial_writes = session.partial_writes,
                    unsaved_len = acc.unflushed_len(),
                    "Response finalized"
                );
                drop(relay);
                Ok(outcome(ResponseStatus::Completed))
            }
        }
    }
}
