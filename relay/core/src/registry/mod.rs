//! Client-Side Stream Registry
//!
//! Tracks the visible messages and stream status of every conversation a
//! client has open, and owns the transport readers feeding them.
//!
//! # Architecture
//!
//! ```text
//!                        ChatStreamRegistry
//!   ┌────────────────────────────────────────────────────────────┐
//!   │ RwLock<HashMap<ConversationId, Arc<RegistryEntry>>>        │
//!   │   replaced whole on every change, never mutated in place   │
//!   ├────────────────────────────────────────────────────────────┤
//!   │ DashMap<ConversationId, ReaderSlot>                        │
//!   │   at most one attached transport reader per conversation   │
//!   ├────────────────────────────────────────────────────────────┤
//!   │ root CancellationToken ──▶ one child token per reader      │
//!   │ broadcast::Sender<RegistryUpdate>                          │
//!   └────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Status machine
//!
//! `idle → reading → {done, error}`. Cancellation (replacement, clearing,
//! shutdown) lands in `idle`, never `error`. Unknown conversations report
//! `idle` with no messages.
//!
//! # Generations
//!
//! Every reader attachment and history load gets a fresh generation number
//! stamped on the entry it creates. Updates from a superseded reader or a
//! stale load carry an older generation and are dropped.

mod decoder;
mod history;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::messages::{ConversationId, Message, MessageId};
use crate::transport::{ByteTransport, TransportError};

pub use decoder::Utf8ChunkDecoder;
pub use history::{HistoryError, HistorySource, StoreHistory};

/// Error text stored when history cannot be loaded
pub const LOAD_FAILED: &str = "Failed to load conversation messages";

/// Default capacity of the change-notification channel
pub const DEFAULT_UPDATE_CAPACITY: usize = 256;

/// Stream status of one conversation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    /// Nothing in flight (also the state after cancellation)
    #[default]
    Idle,
    /// A transport or history load is being read
    Reading,
    /// Reading finished normally
    Done,
    /// Reading failed; see [`RegistryEntry::error`]
    Error,
}

impl fmt::Display for StreamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Reading => "reading",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Immutable snapshot of one conversation's client state
#[derive(Clone, Debug, Default)]
pub struct RegistryEntry {
    /// Visible messages, oldest first
    pub messages: Vec<Arc<Message>>,
    /// Stream status
    pub status: StreamStatus,
    /// Human-readable failure, set with [`StreamStatus::Error`]
    pub error: Option<String>,
    generation: u64,
    /// Local placeholder that has not reached an end state
    streaming_message: Option<MessageId>,
}

impl RegistryEntry {
    /// Placeholder still owned by an unfinished stream
    #[must_use]
    pub fn streaming_message(&self) -> Option<&MessageId> {
        self.streaming_message.as_ref()
    }
}

/// Change notification
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegistryUpdate {
    /// Conversation whose entry changed
    pub conversation_id: ConversationId,
    /// Status after the change (`Idle` when the entry was removed)
    pub status: StreamStatus,
}

enum EntryChange {
    Keep,
    Put(RegistryEntry),
    Remove,
}

struct ReaderSlot {
    generation: u64,
    cancel: CancellationToken,
    /// Cancelled once the reader has dropped its transport
    released: CancellationToken,
}

/// Releases a reader's slot (if still its own) when the reader exits
struct ReaderGuard<'a> {
    readers: &'a DashMap<ConversationId, ReaderSlot>,
    conversation_id: ConversationId,
    generation: u64,
    released: CancellationToken,
}

impl Drop for ReaderGuard<'_> {
    fn drop(&mut self) {
        let generation = self.generation;
        self.readers
            .remove_if(&self.conversation_id, |_, slot| slot.generation == generation);
        self.released.cancel();
    }
}

enum ReadEnd {
    Finished,
    Failed(String),
    Cancelled,
}

enum ReadStep {
    Cancelled,
    Next(Option<Result<bytes::Bytes, TransportError>>),
}

/// Per-conversation client state and transport readers
pub struct ChatStreamRegistry {
    entries: RwLock<HashMap<ConversationId, Arc<RegistryEntry>>>,
    readers: DashMap<ConversationId, ReaderSlot>,
    history: Arc<dyn HistorySource>,
    root: CancellationToken,
    updates: broadcast::Sender<RegistryUpdate>,
    generations: AtomicU64,
}

impl ChatStreamRegistry {
    /// Create a registry loading history from `history`
    pub fn new(history: Arc<dyn HistorySource>) -> Self {
        Self::with_update_capacity(history, DEFAULT_UPDATE_CAPACITY)
    }

    /// Create a registry with a specific notification capacity
    pub fn with_update_capacity(history: Arc<dyn HistorySource>, capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        Self {
            entries: RwLock::new(HashMap::new()),
            readers: DashMap::new(),
            history,
            root: CancellationToken::new(),
            updates,
            generations: AtomicU64::new(1),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Visible messages of a conversation (empty if unknown)
    #[must_use]
    pub fn get_messages(&self, id: &ConversationId) -> Vec<Message> {
        self.entries
            .read()
            .get(id)
            .map(|entry| entry.messages.iter().map(|m| (**m).clone()).collect())
            .unwrap_or_default()
    }

    /// Stream status of a conversation (`Idle` if unknown)
    #[must_use]
    pub fn get_stream_status(&self, id: &ConversationId) -> StreamStatus {
        self.entries
            .read()
            .get(id)
            .map(|entry| entry.status)
            .unwrap_or_default()
    }

    /// Stored failure text, if the conversation is in `Error`
    #[must_use]
    pub fn get_error(&self, id: &ConversationId) -> Option<String> {
        self.entries.read().get(id).and_then(|e| e.error.clone())
    }

    /// Current snapshot of a conversation's entry
    #[must_use]
    pub fn entry(&self, id: &ConversationId) -> Option<Arc<RegistryEntry>> {
        self.entries.read().get(id).cloned()
    }

    /// Whether a transport reader is attached for `id`
    #[must_use]
    pub fn has_active_reader(&self, id: &ConversationId) -> bool {
        self.readers.contains_key(id)
    }

    /// Number of attached transport readers
    #[must_use]
    pub fn active_readers(&self) -> usize {
        self.readers.len()
    }

    /// Subscribe to entry changes
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryUpdate> {
        self.updates.subscribe()
    }

    // ------------------------------------------------------------------
    // Streams
    // ------------------------------------------------------------------

    /// Attach `transport` as the reader for `id` and read it to the end
    ///
    /// Any reader already attached for `id` is cancelled first, and this
    /// call waits until it has dropped its transport. Returns the status
    /// this reader ended in.
    pub async fn start_chat_stream(
        &self,
        id: &ConversationId,
        transport: ByteTransport,
        initial_user_message: Option<Message>,
    ) -> StreamStatus {
        let generation = self.next_generation();
        let cancel = self.root.child_token();
        let released = CancellationToken::new();

        let previous = self.readers.insert(
            id.clone(),
            ReaderSlot {
                generation,
                cancel: cancel.clone(),
                released: released.clone(),
            },
        );
        let _guard = ReaderGuard {
            readers: &self.readers,
            conversation_id: id.clone(),
            generation,
            released,
        };
        // Dropped before the guard fires `released`
        let mut transport = transport;

        if let Some(previous) = previous {
            tracing::info!(
                conversation_id = %id,
                superseded = previous.generation,
                generation,
                "Superseding active stream reader"
            );
            previous.cancel.cancel();
            previous.released.cancelled().await;
        }

        if cancel.is_cancelled() {
            // Superseded or shut down before attaching
            return StreamStatus::Idle;
        }

        let placeholder_id = MessageId(format!("ai-{id}-{generation}"));
        let placeholder = Message::assistant_placeholder(id.clone()).with_id(placeholder_id.clone());

        self.replace_entry(id, |prev| {
            let mut messages: Vec<Arc<Message>> = prev
                .map(|entry| {
                    entry
                        .messages
                        .iter()
                        .filter(|m| entry.streaming_message.as_ref() != Some(&m.id))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            messages.extend(initial_user_message.map(Arc::new));
            messages.push(Arc::new(placeholder));
            EntryChange::Put(RegistryEntry {
                messages,
                status: StreamStatus::Reading,
                error: None,
                generation,
                streaming_message: Some(placeholder_id.clone()),
            })
        });

        tracing::info!(conversation_id = %id, generation, "Stream reader attached");

        let mut decoder = Utf8ChunkDecoder::new();
        let end = loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => ReadStep::Cancelled,
                next = transport.next() => ReadStep::Next(next),
            };

            match step {
                ReadStep::Cancelled => break ReadEnd::Cancelled,
                ReadStep::Next(Some(Ok(bytes))) => {
                    let text = decoder.decode(&bytes);
                    if text.is_empty() {
                        tracing::debug!(conversation_id = %id, "Chunk decoded to nothing yet");
                        continue;
                    }
                    self.append_to_placeholder(id, generation, &placeholder_id, &text);
                }
                ReadStep::Next(Some(Err(e))) => {
                    // Producer-side cancellation is still cancellation
                    if cancel.is_cancelled() || e == TransportError::Interrupted {
                        break ReadEnd::Cancelled;
                    }
                    break ReadEnd::Failed(e.to_string());
                }
                ReadStep::Next(None) => {
                    let tail = decoder.finish();
                    if !tail.is_empty() {
                        self.append_to_placeholder(id, generation, &placeholder_id, &tail);
                    }
                    break ReadEnd::Finished;
                }
            }
        };
        drop(transport);

        let (status, error) = match end {
            ReadEnd::Finished => (StreamStatus::Done, None),
            ReadEnd::Failed(message) => {
                tracing::warn!(conversation_id = %id, error = %message, "Stream read failed");
                (StreamStatus::Error, Some(message))
            }
            ReadEnd::Cancelled => {
                tracing::info!(conversation_id = %id, generation, "Stream reader cancelled");
                (StreamStatus::Idle, None)
            }
        };

        self.replace_entry(id, |prev| match prev {
            Some(entry) if entry.generation == generation => {
                EntryChange::Put(finish_entry(entry, status, error))
            }
            _ => EntryChange::Keep,
        });

        status
    }

    /// Cancel any reader for `id` and forget its state
    pub fn clear_chat_state(&self, id: &ConversationId) {
        if let Some((_, slot)) = self.readers.remove(id) {
            tracing::info!(conversation_id = %id, "Aborting stream reader on clear");
            slot.cancel.cancel();
        }
        self.replace_entry(id, |_| EntryChange::Remove);
    }

    /// Load persisted history if nothing is recorded for `id`
    ///
    /// No-op when messages exist or a read is already in progress.
    pub async fn load_conversation_messages(&self, id: &ConversationId) {
        let generation = self.next_generation();
        let mut should_fetch = false;

        self.replace_entry(id, |prev| match prev {
            Some(entry) if !entry.messages.is_empty() || entry.status == StreamStatus::Reading => {
                EntryChange::Keep
            }
            _ => {
                should_fetch = true;
                EntryChange::Put(RegistryEntry {
                    status: StreamStatus::Reading,
                    generation,
                    ..Default::default()
                })
            }
        });

        if !should_fetch {
            return;
        }

        let result = tokio::select! {
            biased;
            () = self.root.cancelled() => None,
            result = self.history.fetch_messages(id) => Some(result),
        };

        let next = match result {
            None => RegistryEntry {
                status: StreamStatus::Idle,
                generation,
                ..Default::default()
            },
            Some(Ok(messages)) => {
                tracing::debug!(
                    conversation_id = %id,
                    count = messages.len(),
                    "Loaded conversation history"
                );
                RegistryEntry {
                    messages: messages.into_iter().map(Arc::new).collect(),
                    status: StreamStatus::Done,
                    generation,
                    ..Default::default()
                }
            }
            Some(Err(e)) => {
                tracing::warn!(conversation_id = %id, error = %e, "Loading history failed");
                RegistryEntry {
                    status: StreamStatus::Error,
                    error: Some(LOAD_FAILED.to_string()),
                    generation,
                    ..Default::default()
                }
            }
        };

        self.replace_entry(id, |prev| match prev {
            Some(entry) if entry.generation == generation => EntryChange::Put(next),
            _ => EntryChange::Keep,
        });
    }

    /// Cancel every attached reader
    ///
    /// Readers started afterwards end immediately in `Idle`.
    pub fn shutdown(&self) {
        tracing::info!(readers = self.readers.len(), "Shutting down stream registry");
        self.root.cancel();
    }

    /// Whether [`shutdown`](Self::shutdown) was called
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst)
    }

    fn append_to_placeholder(
        &self,
        id: &ConversationId,
        generation: u64,
        placeholder_id: &MessageId,
        text: &str,
    ) {
        self.replace_entry(id, |prev| {
            let Some(entry) = prev else {
                return EntryChange::Keep;
            };
            if entry.generation != generation {
                return EntryChange::Keep;
            }
            match entry.messages.last() {
                Some(last) if &last.id == placeholder_id => {
                    let mut next = RegistryEntry::clone(entry);
                    let updated = last.appended(text);
                    next.messages.pop();
                    next.messages.push(Arc::new(updated));
                    EntryChange::Put(next)
                }
                _ => {
                    tracing::warn!(
                        conversation_id = %id,
                        expected = %placeholder_id,
                        "Last message is not the stream placeholder, dropping chunk"
                    );
                    EntryChange::Keep
                }
            }
        });
    }

    fn replace_entry<F>(&self, id: &ConversationId, change: F)
    where
        F: FnOnce(Option<&Arc<RegistryEntry>>) -> EntryChange,
    {
        let status = {
            let mut entries = self.entries.write();
            match change(entries.get(id)) {
                EntryChange::Keep => return,
                EntryChange::Put(entry) => {
                    let status = entry.status;
                    entries.insert(id.clone(), Arc::new(entry));
                    status
                }
                EntryChange::Remove => {
                    if entries.remove(id).is_none() {
                        return;
                    }
                    StreamStatus::Idle
                }
            }
        };

        // No subscribers is fine
        let _ = self.updates.send(RegistryUpdate {
            conversation_id: id.clone(),
            status,
        });
    }
}

impl Drop for ChatStreamRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Entry after its reader ended with `status`
fn finish_entry(entry: &RegistryEntry, status: StreamStatus, error: Option<String>) -> RegistryEntry {
    let mut next = entry.clone();
    next.status = status;
    next.error = error;

    if status == StreamStatus::Idle {
        // Keep the placeholder marked so a later stream can discard it
        return next;
    }

    if let Some(placeholder) = next.streaming_message.take() {
        if let Some(slot) = next.messages.iter_mut().rev().find(|m| m.id == placeholder) {
            let mut done = (**slot).clone();
            done.streaming = false;
            done.completed = true;
            *slot = Arc::new(done);
        }
    }
    next
}
