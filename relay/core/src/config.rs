//! Relay Configuration
//!
//! Configuration is layered: built-in defaults, then an optional TOML file,
//! then environment variables, then explicit overrides (usually CLI flags).
//!
//! ```toml
//! log_filter = "relay_core=debug"
//!
//! [provider]
//! kind = "openrouter"
//! model = "openai/gpt-4-turbo"
//! api_key_env = "OPENROUTER_API_KEY"
//!
//! [streaming]
//! failure_notice = "The response could not be completed."
//!
//! [titles]
//! enabled = true
//! max_chars = 50
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::OPENROUTER_BASE_URL;
use crate::messages::PLACEHOLDER_TITLE;

/// Errors while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File that failed
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// Config file is not valid TOML for this schema
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File that failed
        path: PathBuf,
        /// Underlying TOML error
        #[source]
        source: toml::de::Error,
    },
    /// A value is present but unusable
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which provider API to talk to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible API (OpenRouter by default)
    #[default]
    OpenRouter,
    /// Local Ollama server
    Ollama,
}

impl ProviderKind {
    /// Parse a provider name (case-insensitive)
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "openrouter" | "openai" => Some(Self::OpenRouter),
            "ollama" => Some(Self::Ollama),
            _ => None,
        }
    }
}

/// `[provider]` section
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider API flavour
    pub kind: ProviderKind,
    /// API root (Ollama: `http://host:port`)
    pub base_url: Option<String>,
    /// Model identifier
    pub model: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Optional system prompt sent before the history
    pub system_prompt: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kind: ProviderKind::OpenRouter,
            base_url: None,
            model: "openai/gpt-4-turbo".to_string(),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            timeout_secs: 120,
            system_prompt: None,
        }
    }
}

impl ProviderConfig {
    /// Request timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Effective API root for the configured provider
    #[must_use]
    pub fn effective_base_url(&self) -> String {
        if let Some(ref url) = self.base_url {
            return url.clone();
        }
        match self.kind {
            ProviderKind::OpenRouter => OPENROUTER_BASE_URL.to_string(),
            ProviderKind::Ollama => {
                let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "localhost".into());
                let port = std::env::var("OLLAMA_PORT").unwrap_or_else(|_| "11434".into());
                format!("http://{host}:{port}")
            }
        }
    }

    /// Read the API key from the configured environment variable
    #[must_use]
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// `[streaming]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Text persisted when a response fails before any chunk arrived
    pub failure_notice: String,
    /// Collapse queued partial writes into the newest one
    pub writer_coalesce: bool,
    /// Broadcast capacity for registry change notifications
    pub update_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            failure_notice: "Sorry, the response could not be completed.".to_string(),
            writer_coalesce: true,
            update_capacity: 256,
        }
    }
}

/// `[titles]` section
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TitleConfig {
    /// Generate titles with the provider (fallback: truncated first message)
    pub enabled: bool,
    /// Maximum title length in characters
    pub max_chars: usize,
    /// Title shown while generation is pending
    pub placeholder: String,
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_chars: 50,
            placeholder: PLACEHOLDER_TITLE.to_string(),
        }
    }
}

/// Full relay configuration (the shape of `relay.toml`)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Model provider settings
    pub provider: ProviderConfig,
    /// Driver and registry settings
    pub streaming: StreamingConfig,
    /// Conversation title settings
    pub titles: TitleConfig,
    /// `tracing` filter directive used by binaries
    pub log_filter: Option<String>,
}

impl RelayConfig {
    /// Parse from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply environment overrides
    ///
    /// Environment variables:
    /// - `RELAY_PROVIDER`: "openrouter" or "ollama"
    /// - `RELAY_MODEL`: model identifier
    /// - `RELAY_BASE_URL`: provider API root
    /// - `RELAY_LOG`: tracing filter
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(kind) = std::env::var("RELAY_PROVIDER") {
            self.provider.kind = ProviderKind::parse(&kind)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown provider {kind:?}")))?;
        }
        if let Ok(model) = std::env::var("RELAY_MODEL") {
            self.provider.model = model;
        }
        if let Ok(url) = std::env::var("RELAY_BASE_URL") {
            self.provider.base_url = Some(url);
        }
        if let Ok(filter) = std::env::var("RELAY_LOG") {
            self.log_filter = Some(filter);
        }
        Ok(())
    }

    /// Apply explicit overrides (highest precedence)
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(kind) = overrides.provider {
            self.provider.kind = kind;
        }
        if let Some(ref model) = overrides.model {
            self.provider.model.clone_from(model);
        }
        if let Some(ref url) = overrides.base_url {
            self.provider.base_url = Some(url.clone());
        }
        if let Some(enabled) = overrides.titles_enabled {
            self.titles.enabled = enabled;
        }
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.provider.model.trim().is_empty() {
            return Err(ConfigError::Invalid("provider.model is empty".into()));
        }
        if self.titles.max_chars == 0 {
            return Err(ConfigError::Invalid("titles.max_chars must be > 0".into()));
        }
        if self.streaming.update_capacity == 0 {
            return Err(ConfigError::Invalid(
                "streaming.update_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Overrides supplied programmatically (e.g. from CLI flags)
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Provider kind
    pub provider: Option<ProviderKind>,
    /// Model identifier
    pub model: Option<String>,
    /// Provider API root
    pub base_url: Option<String>,
    /// Enable/disable title generation
    pub titles_enabled: Option<bool>,
}

/// Where the loaded configuration came from
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigSource {
    /// Built-in defaults only
    Defaults,
    /// A TOML file
    File(PathBuf),
}

/// Default config path: `$XDG_CONFIG_HOME/team-relay/relay.toml`
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("team-relay").join("relay.toml"))
}

/// Load configuration from a specific file, then apply env and overrides
pub fn load_config_from_path(
    path: &Path,
    overrides: &ConfigOverrides,
) -> Result<(RelayConfig, ConfigSource), ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut config = RelayConfig::from_toml_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.apply_env()?;
    config.apply_overrides(overrides);
    config.validate()?;

    tracing::debug!(path = %path.display(), "Loaded relay config");
    Ok((config, ConfigSource::File(path.to_path_buf())))
}

/// Load configuration from `path`, or the default path if it exists,
/// falling back to built-in defaults
pub fn load_config(
    path: Option<&Path>,
    overrides: &ConfigOverrides,
) -> Result<(RelayConfig, ConfigSource), ConfigError> {
    if let Some(path) = path {
        return load_config_from_path(path, overrides);
    }

    if let Some(default) = default_config_path().filter(|p| p.exists()) {
        return load_config_from_path(&default, overrides);
    }

    let mut config = RelayConfig::default();
    config.apply_env()?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok((config, ConfigSource::Defaults))
}
