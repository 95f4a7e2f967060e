//! Conversation titles
//!
//! A new conversation starts with the placeholder title. Once its first
//! message is stored, a short title is asked from the provider in the
//! background and patched in once.

use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::backend::{ChatTurn, LlmBackend, LlmRequest};
use crate::config::TitleConfig;
use crate::messages::ConversationId;
use crate::persistence::{ConversationStore, StoreError};

const TITLE_PROMPT: &str = "Write a title of at most six words for a conversation \
that starts with the message below. Reply with the title only.";

/// Generates and stores conversation titles
pub struct TitleGenerator {
    backend: Arc<dyn LlmBackend>,
    store: Arc<dyn ConversationStore>,
    model: String,
    config: TitleConfig,
}

impl TitleGenerator {
    /// Create a generator using `model` on `backend`
    pub fn new(
        backend: Arc<dyn LlmBackend>,
        store: Arc<dyn ConversationStore>,
        model: impl Into<String>,
        config: TitleConfig,
    ) -> Self {
        Self {
            backend,
            store,
            model: model.into(),
            config,
        }
    }

    /// Title for a conversation starting with `first_message`
    ///
    /// Never fails: provider errors and unusable replies fall back to the
    /// truncated first message.
    pub async fn generate(&self, first_message: &str) -> String {
        if !self.config.enabled {
            return fallback_title(first_message, self.config.max_chars);
        }

        let request = LlmRequest::new(vec![ChatTurn::user(first_message)], &self.model)
            .with_stream(false)
            .with_system(TITLE_PROMPT)
            .with_temperature(0.3)
            .with_max_tokens(24);

        match self.backend.send(&request).await {
            Ok(response) => clean_title(&response.content, self.config.max_chars)
                .unwrap_or_else(|| fallback_title(first_message, self.config.max_chars)),
            Err(e) => {
                tracing::warn!(error = %e, "Title generation failed, using fallback");
                fallback_title(first_message, self.config.max_chars)
            }
        }
    }

    /// Generate a title and store it on the conversation
    pub async fn apply(
        &self,
        conversation_id: &ConversationId,
        first_message: &str,
    ) -> Result<String, StoreError> {
        let title = self.generate(first_message).await;
        self.store.set_title(conversation_id, &title).await?;
        tracing::info!(conversation_id = %conversation_id, title = %title, "Conversation titled");
        Ok(title)
    }

    /// Run [`apply`](Self::apply) in the background
    pub fn spawn(
        self: &Arc<Self>,
        conversation_id: ConversationId,
        first_message: String,
    ) -> JoinHandle<()> {
        let generator = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = generator.apply(&conversation_id, &first_message).await {
                tracing::warn!(
                    conversation_id = %conversation_id,
                    error = %e,
                    "Could not store conversation title"
                );
            }
        })
    }
}

/// First line of a model reply, without quotes or trailing punctuation
#[must_use]
pub fn clean_title(raw: &str, max_chars: usize) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|l| !l.is_empty())?;
    let line = line
        .trim_start_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*' | '#'))
        .trim_end_matches(|c: char| matches!(c, '"' | '\'' | '`' | '*'))
        .trim_end_matches(|c: char| matches!(c, '.' | '!' | '?' | ',' | ':' | ';'))
        .trim();
    let line = line.strip_prefix("Title:").map_or(line, str::trim);

    if line.is_empty() {
        return None;
    }
    Some(line.chars().take(max_chars).collect())
}

/// First message truncated to `max_chars` characters, with `...` if cut
#[must_use]
pub fn fallback_title(first_message: &str, max_chars: usize) -> String {
    let trimmed = first_message.trim();
    let mut title: String = trimmed.chars().take(max_chars).collect();
    if trimmed.chars().count() > max_chars {
        title.push_str("...");
    }
    title
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{LlmResponse, StreamingToken};
    use crate::messages::TeamId;
    use crate::persistence::InMemoryStore;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct CannedBackend(Option<String>);

    #[async_trait]
    impl LlmBackend for CannedBackend {
        fn name(&self) -> &str {
            "canned"
        }

        async fn health_check(&self) -> bool {
            true
        }

        async fn send_streaming(
            &self,
            _request: &LlmRequest,
        ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
            anyhow::bail!("not used")
        }

        async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
            match self.0 {
                Some(ref content) => Ok(LlmResponse {
                    content: content.clone(),
                    model: request.model.clone(),
                    tokens_used: None,
                    duration_ms: None,
                }),
                None => anyhow::bail!("provider down"),
            }
        }
    }

    fn generator(reply: Option<&str>, store: Arc<InMemoryStore>) -> TitleGenerator {
        TitleGenerator::new(
            Arc::new(CannedBackend(reply.map(str::to_string))),
            store,
            "m",
            TitleConfig::default(),
        )
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(
            clean_title("\"Rust Borrow Checker Tips.\"\nextra", 50),
            Some("Rust Borrow Checker Tips".to_string())
        );
        assert_eq!(
            clean_title("Title: Trip planning", 50),
            Some("Trip planning".to_string())
        );
        assert_eq!(clean_title("  \n ", 50), None);
        assert_eq!(clean_title("abcdef", 3), Some("abc".to_string()));
    }

    #[test]
    fn test_fallback_title_truncates_by_chars() {
        assert_eq!(fallback_title("short", 50), "short");
        let long = "é".repeat(60);
        let title = fallback_title(&long, 50);
        assert_eq!(title.chars().count(), 53);
        assert!(title.ends_with("..."));
    }

    #[tokio::test]
    async fn test_generate_uses_provider_reply() {
        let store = Arc::new(InMemoryStore::new());
        let title = generator(Some("Weekend Plans"), store)
            .generate("what should we do this weekend?")
            .await;
        assert_eq!(title, "Weekend Plans");
    }

    #[tokio::test]
    async fn test_generate_falls_back_on_error() {
        let store = Arc::new(InMemoryStore::new());
        let title = generator(None, store).generate("hello there").await;
        assert_eq!(title, "hello there");
    }

    #[tokio::test]
    async fn test_apply_patches_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let conv = store.create_conversation(&TeamId::from("t")).await.unwrap();

        let title = generator(Some("Greetings"), store.clone())
            .apply(&conv.id, "hi")
            .await
            .unwrap();

        let conv = store.get_conversation(&conv.id).await.unwrap();
        assert_eq!(title, "Greetings");
        assert_eq!(conv.title, "Greetings");
        assert!(!conv.title_loading);
    }
}
