//! LLM Backend Integration
//!
//! Abstracted access to model providers through a common trait interface.
//!
//! # Available Backends
//!
//! - **OpenRouter**: any OpenAI-compatible `/chat/completions` API (default)
//! - **Ollama**: Local LLM server
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{ChatTurn, LlmBackend, LlmRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::from_env();
//! let request = LlmRequest::new(vec![ChatTurn::user("Hello!")], "llama3");
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod lines;
mod ollama;
mod openrouter;
mod traits;

use std::sync::Arc;

pub use ollama::OllamaBackend;
pub use openrouter::{OpenRouterBackend, OPENROUTER_BASE_URL};
pub use traits::{ChatTurn, LlmBackend, LlmRequest, LlmResponse, StreamingToken};

use crate::config::{ProviderConfig, ProviderKind};

/// Build the backend described by `config`
///
/// OpenRouter requires an API key in the configured environment variable.
pub fn from_config(config: &ProviderConfig) -> anyhow::Result<Arc<dyn LlmBackend>> {
    match config.kind {
        ProviderKind::OpenRouter => {
            let Some(api_key) = config.api_key() else {
                anyhow::bail!(
                    "no API key for OpenRouter: set {} in the environment",
                    config.api_key_env
                );
            };
            Ok(Arc::new(OpenRouterBackend::new(
                config.effective_base_url(),
                api_key,
                config.timeout(),
            )))
        }
        ProviderKind::Ollama => {
            let url = config.effective_base_url();
            let (host, port) = split_host_port(&url)?;
            Ok(Arc::new(OllamaBackend::new(host, port, config.timeout())))
        }
    }
}

fn split_host_port(url: &str) -> anyhow::Result<(String, u16)> {
    let rest = url
        .trim_start_matches("http://")
        .trim_start_matches("https://")
        .trim_end_matches('/');
    match rest.rsplit_once(':') {
        Some((host, port)) => Ok((host.to_string(), port.parse()?)),
        None => Ok((rest.to_string(), 11434)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("http://gpu-box:8080/").unwrap(),
            ("gpu-box".to_string(), 8080)
        );
        assert_eq!(
            split_host_port("localhost").unwrap(),
            ("localhost".to_string(), 11434)
        );
        assert!(split_host_port("http://host:notaport").is_err());
    }

    #[test]
    fn test_ollama_from_config() {
        let config = ProviderConfig {
            kind: ProviderKind::Ollama,
            base_url: Some("http://127.0.0.1:11434".into()),
            ..Default::default()
        };
        let backend = from_config(&config).unwrap();
        assert_eq!(backend.name(), "Ollama");
    }

    #[test]
    fn test_openrouter_requires_key() {
        let config = ProviderConfig {
            api_key_env: "RELAY_TEST_KEY_THAT_IS_NEVER_SET".into(),
            ..Default::default()
        };
        assert!(from_config(&config).is_err());
    }
}
