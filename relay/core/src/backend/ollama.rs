//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server), using the `/api/chat`
//! endpoint so the whole conversation history is sent on every turn.
//!
//! Streaming responses are newline-delimited JSON objects carrying
//! `message.content` deltas and a final `done: true`.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::lines::{spawn_line_pump, LineEvent};
use super::traits::{LlmBackend, LlmRequest, LlmResponse, StreamingToken};

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    /// Create from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self::new(host, port, Duration::from_secs(120))
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for `/api/chat`
    fn build_body(request: &LlmRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .wire_messages()
            .into_iter()
            .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
            .collect();

        let mut options = serde_json::Map::new();
        options.insert("temperature".to_string(), serde_json::json!(request.temperature));
        if request.max_tokens > 0 {
            options.insert(
                "num_predict".to_string(),
                serde_json::json!(request.max_tokens),
            );
        }

        serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
            "options": options,
        })
    }
}

/// Interpret one NDJSON line from a streaming `/api/chat` response
pub(crate) fn parse_chat_line(line: &str) -> LineEvent {
    let Ok(data) = serde_json::from_str::<serde_json::Value>(line) else {
        return LineEvent::Skip;
    };

    if let Some(error) = data.get("error").and_then(|e| e.as_str()) {
        return LineEvent::Fail(error.to_string());
    }

    if data
        .get("done")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
    {
        return LineEvent::Done;
    }

    match data
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => LineEvent::Token(text.to_string()),
        _ => LineEvent::Skip,
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok()
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request, true))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        spawn_line_pump(response.bytes_stream(), tx, parse_chat_line);
        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request, false))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        let data: serde_json::Value = response.json().await?;

        let content = data
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let tokens_used = data
            .get("eval_count")
            .and_then(serde_json::Value::as_u64)
            .and_then(|c| u32::try_from(c).ok());

        Ok(LlmResponse {
            content,
            model: request.model.clone(),
            tokens_used,
            duration_ms: u64::try_from(start.elapsed().as_millis()).ok(),
        })
    }
}
