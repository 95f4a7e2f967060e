//! Relay Core - Streaming Response Coordination for team chat
//!
//! This crate turns a model provider's token stream into durable,
//! incrementally persisted assistant messages, and keeps client-side views
//! of those messages in sync while they stream. It has no UI or HTTP server
//! dependencies; a binary wires it to a provider and a store.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── server side ────────────────────────────┐
//! │                                                                     │
//! │  ChatService::send_message                                          │
//! │     │  store user message, schedule title, build history            │
//! │     ▼                                                               │
//! │  LlmBackend ──StreamingToken──▶ StreamDriver ──▶ PersistenceWriter  │
//! │  (OpenRouter / Ollama)              │   should_flush    │           │
//! │                                     │                   ▼           │
//! │                                     │            PersistenceSink    │
//! │                                ChunkRelay                           │
//! └─────────────────────────────────────┼───────────────────────────────┘
//!                                       │ ByteTransport (UTF-8 bytes)
//! ┌─────────────────────────────────────┼──── client side ──────────────┐
//! │                                     ▼                               │
//! │                          ChatStreamRegistry                         │
//! │        get_messages / get_stream_status / subscribe                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`StreamDriver`]: drives one response to exactly one terminal write
//! - [`ChatStreamRegistry`]: per-conversation client state and readers
//! - [`ChatService`]: send a message and get the live transport back
//! - [`InMemoryStore`]: process-local store implementing every seam
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use relay_core::{backend, ChatService, ChatStreamRegistry, InMemoryStore, SendMessage};
//!
//! let (config, _) = relay_core::load_config(None, &Default::default())?;
//! let store = Arc::new(InMemoryStore::new());
//! let chat = ChatService::new(store.clone(), backend::from_config(&config.provider)?, &config);
//! let registry = ChatStreamRegistry::new(store);
//!
//! let receipt = chat
//!     .send_message(SendMessage::new_conversation("team".into(), "Hello!"))
//!     .await?;
//! registry
//!     .start_chat_stream(&receipt.conversation_id, receipt.transport, None)
//!     .await;
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: model provider abstraction (OpenRouter, Ollama)
//! - [`chat`]: message sending and title generation
//! - [`config`]: TOML + environment configuration
//! - [`delimiter`]: when a chunk is worth persisting early
//! - [`messages`]: conversation data model
//! - [`persistence`]: store and sink traits, in-memory store
//! - [`registry`]: client-side stream registry
//! - [`streaming`]: server-side stream driver
//! - [`transport`]: byte transport between relay and registry

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod chat;
pub mod config;
pub mod delimiter;
pub mod messages;
pub mod persistence;
pub mod registry;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use backend::{ChatTurn, LlmBackend, LlmRequest, LlmResponse, StreamingToken};
pub use chat::{ChatError, ChatService, SendMessage, SendReceipt, TitleGenerator};
pub use delimiter::should_flush;
pub use messages::{
    Conversation, ConversationId, Message, MessageId, MessagePatch, MessageRole, TeamId,
};
pub use persistence::{ConversationStore, InMemoryStore, PersistenceSink, StoreError};

// Registry exports
pub use registry::{
    ChatStreamRegistry, HistoryError, HistorySource, RegistryEntry, RegistryUpdate, StoreHistory,
    StreamStatus,
};

// Streaming exports
pub use streaming::{
    DriverConfig, DriverError, ResponseAccumulator, ResponseOutcome, ResponseStatus,
    StreamDriver,
};

// Transport exports
pub use transport::{relay_channel, ByteTransport, ChunkRelay, TransportError};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigOverrides,
    ConfigSource, ProviderConfig, ProviderKind, RelayConfig, StreamingConfig, TitleConfig,
};
