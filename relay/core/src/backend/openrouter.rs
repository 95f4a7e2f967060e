//! OpenRouter Backend Implementation
//!
//! Client for OpenAI-compatible `/chat/completions` APIs (OpenRouter by
//! default). Streaming responses arrive as server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Hel"}}]}
//! : OPENROUTER PROCESSING
//! data: [DONE]
//! ```

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::lines::{spawn_line_pump, LineEvent};
use super::traits::{LlmBackend, LlmRequest, LlmResponse, StreamingToken};

/// Default OpenRouter API root
pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// OpenAI-compatible chat completions client
#[derive(Clone)]
pub struct OpenRouterBackend {
    /// API root, without trailing slash
    base_url: String,
    /// Bearer token
    api_key: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OpenRouterBackend {
    /// Create a new backend
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http_client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
        }
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn build_body(request: &LlmRequest, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .wire_messages()
            .into_iter()
            .map(|(role, content)| serde_json::json!({ "role": role, "content": content }))
            .collect();

        let mut body = serde_json::json!({
            "model": request.model,
            "messages": messages,
            "stream": stream,
            "temperature": request.temperature,
        });
        if request.max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(request.max_tokens);
        }
        body
    }

    async fn post(&self, body: &serde_json::Value) -> anyhow::Result<reqwest::Response> {
        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("OpenRouter returned {status}: {text}");
        }
        Ok(response)
    }
}

/// Interpret one SSE line from a streaming completion
pub(crate) fn parse_sse_line(line: &str) -> LineEvent {
    // Comments and non-data fields are keep-alives
    let Some(payload) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return LineEvent::Done;
    }

    let Ok(data) = serde_json::from_str::<serde_json::Value>(payload) else {
        return LineEvent::Skip;
    };

    if let Some(error) = data.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map_or_else(|| error.to_string(), str::to_string);
        return LineEvent::Fail(message);
    }

    match data
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
    {
        Some(text) if !text.is_empty() => LineEvent::Token(text.to_string()),
        _ => LineEvent::Skip,
    }
}

#[async_trait]
impl LlmBackend for OpenRouterBackend {
    fn name(&self) -> &'static str {
        "OpenRouter"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.models_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);
        let response = self.post(&Self::build_body(request, true)).await?;
        spawn_line_pump(response.bytes_stream(), tx, parse_sse_line);
        Ok(rx)
    }

    async fn send(&self, request: &LlmRequest) -> anyhow::Result<LlmResponse> {
        let start = Instant::now();
        let response = self.post(&Self::build_body(request, false)).await?;
        let data: serde_json::Value = response.json().await?;

        let content = data
            .pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .unwrap_or("")
            .to_string();

        let tokens_used = data
            .pointer("/usage/total_tokens")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ChatTurn;

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let backend = OpenRouterBackend::new("https://example.com/v1/", "k", Duration::from_secs(1));
        assert_eq!(
            backend.completions_url(),
            "https://example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_build_body() {
        let request = LlmRequest::new(vec![ChatTurn::user("Hi")], "openai/gpt-4-turbo");
        let body = OpenRouterBackend::build_body(&request, true);
        assert_eq!(body["model"], "openai/gpt-4-turbo");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["stream"], true);
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_parse_sse_delta() {
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#),
            LineEvent::Token("Hel".into())
        );
        assert_eq!(
            parse_sse_line(r#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#),
            LineEvent::Skip
        );
    }

    #[test]
    fn test_parse_sse_control_lines() {
        assert_eq!(parse_sse_line("data: [DONE]"), LineEvent::Done);
        assert_eq!(parse_sse_line(": OPENROUTER PROCESSING"), LineEvent::Skip);
        assert_eq!(
            parse_sse_line(r#"data: {"error":{"message":"rate limited","code":429}}"#),
            LineEvent::Fail("rate limited".into())
        );
    }
}
