//! Chat Orchestration
//!
//! [`ChatService`] accepts a user message, stores it, and schedules the
//! assistant response as a background task that streams from the provider
//! through the [`StreamDriver`](crate::streaming::StreamDriver). Callers
//! get the live byte transport back immediately and can hand it to a
//! [`ChatStreamRegistry`](crate::registry::ChatStreamRegistry).

mod service;
mod title;

pub use service::{ChatError, ChatService, SendMessage, SendReceipt};
pub use title::{clean_title, fallback_title, TitleGenerator};
