//! Relay Chat
//!
//! Sends one or more messages through the streaming core against a real
//! provider and prints the assistant response as it streams. Every message
//! after the first is a reply in the same conversation.
//!
//! # Usage
//!
//! ```bash
//! # OpenRouter (needs OPENROUTER_API_KEY)
//! relay-chat "What is a monad?" "Shorter please"
//!
//! # Local Ollama
//! relay-chat --provider ollama --model llama3.2 "Hello"
//!
//! # Dump the stored conversation afterwards
//! relay-chat --json "Hello"
//! ```
//!
//! # Environment Variables
//!
//! - `RELAY_CONFIG`: config file path (default `$XDG_CONFIG_HOME/team-relay/relay.toml`)
//! - `RELAY_PROVIDER`, `RELAY_MODEL`, `RELAY_BASE_URL`: provider overrides
//! - `RUST_LOG` / `RELAY_LOG`: log filter
//!
//! # Signals
//!
//! - SIGINT: stop the current response; what has streamed so far is kept

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use relay_core::{
    backend, load_config, ChatService, ChatStreamRegistry, ConfigOverrides, ConfigSource,
    ConversationId, InMemoryStore, MessageRole, ProviderKind, SendMessage, StreamStatus, TeamId,
};

const DEFAULT_LOG_FILTER: &str = "relay_cli=info,relay_core=info";

#[derive(Debug, Parser)]
#[command(name = "relay-chat", version, about = "Stream a chat through team-relay")]
struct Args {
    /// Config file
    #[arg(long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Team owning the conversation
    #[arg(long, default_value = "local")]
    team: String,

    /// Provider: openrouter or ollama
    #[arg(long, value_parser = parse_provider)]
    provider: Option<ProviderKind>,

    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    /// Provider API root
    #[arg(long)]
    base_url: Option<String>,

    /// Skip generated titles
    #[arg(long)]
    no_titles: bool,

    /// Print the stored conversation as JSON when done
    #[arg(long)]
    json: bool,

    /// Messages to send, in order
    #[arg(required = true)]
    messages: Vec<String>,
}

fn parse_provider(value: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(value).ok_or_else(|| format!("unknown provider: {value}"))
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            provider: self.provider,
            model: self.model.clone(),
            base_url: self.base_url.clone(),
            titles_enabled: self.no_titles.then_some(false),
        }
    }
}

fn init_logging(config_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let (config, source) = load_config(args.config.as_deref(), &args.overrides())
        .context("failed to load configuration")?;
    init_logging(config.log_filter.as_deref());

    match source {
        ConfigSource::File(path) => info!(path = %path.display(), "Using config file"),
        ConfigSource::Defaults => info!("Using built-in configuration"),
    }

    let backend = backend::from_config(&config.provider)?;
    if !backend.health_check().await {
        warn!(backend = backend.name(), "Provider health check failed, trying anyway");
    }
    info!(
        backend = backend.name(),
        model = %config.provider.model,
        "Provider ready"
    );

    let store = Arc::new(InMemoryStore::new());
    let chat = ChatService::new(store.clone(), backend, &config);
    let registry = Arc::new(ChatStreamRegistry::with_update_capacity(
        store,
        config.streaming.update_capacity,
    ));

    let team = TeamId::from(args.team.as_str());
    let mut conversation: Option<ConversationId> = None;

    for text in &args.messages {
        let request = match conversation.clone() {
            Some(id) => SendMessage::reply(team.clone(), id, text.as_str()),
            None => SendMessage::new_conversation(team.clone(), text.as_str()),
        };
        let id = stream_one(&chat, &registry, request).await?;
        conversation = Some(id);
    }

    registry.shutdown();

    if let (true, Some(id)) = (args.json, conversation) {
        let summary = serde_json::json!({
            "conversation": chat.conversation(&id).await?,
            "messages": chat.messages(&id).await?,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    }

    Ok(())
}

/// Send one message and print the response while it streams
async fn stream_one(
    chat: &ChatService,
    registry: &Arc<ChatStreamRegistry>,
    request: SendMessage,
) -> anyhow::Result<ConversationId> {
    let receipt = chat.send_message(request).await?;
    let id = receipt.conversation_id.clone();
    let user = chat
        .messages(&id)
        .await?
        .into_iter()
        .find(|m| m.id == receipt.user_message_id);

    let mut updates = registry.subscribe();
    let mut reader = {
        let registry = Arc::clone(registry);
        let id = id.clone();
        let transport = receipt.transport;
        tokio::spawn(async move { registry.start_chat_stream(&id, transport, user).await })
    };

    let mut printed = 0;
    let status = loop {
        tokio::select! {
            joined = &mut reader => break joined?,
            update = updates.recv() => match update {
                Ok(update) if update.conversation_id == id => {
                    printed = print_new_text(registry, &id, printed)?;
                }
                // The registry owns the sender, so only lag can happen here
                Ok(_) | Err(_) => {}
            },
            _ = tokio::signal::ctrl_c() => {
                info!(conversation_id = %id, "Interrupted, stopping response");
                receipt.cancel.cancel();
            }
        }
    };
    print_new_text(registry, &id, printed)?;
    println!();

    match receipt.response.await? {
        Ok(outcome) => info!(
            message_id = %outcome.message_id,
            status = ?outcome.status,
            chunks = outcome.chunks,
            partial_writes = outcome.partial_writes,
            elapsed_ms = outcome.elapsed.as_millis(),
            "Response stored"
        ),
        Err(e) => warn!(error = %e, "Response failed"),
    }

    if status == StreamStatus::Error {
        if let Some(error) = registry.get_error(&id) {
            eprintln!("error: {error}");
        }
    }

    Ok(id)
}

/// Print whatever the assistant message gained since `printed` bytes
fn print_new_text(
    registry: &ChatStreamRegistry,
    id: &ConversationId,
    printed: usize,
) -> anyhow::Result<usize> {
    let Some(message) = registry
        .get_messages(id)
        .into_iter()
        .rev()
        .find(|m| m.role == MessageRole::Assistant)
    else {
        return Ok(printed);
    };

    if let Some(fresh) = message.content.get(printed..) {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(fresh.as_bytes())?;
        stdout.flush()?;
        return Ok(message.content.len());
    }
    Ok(printed)
}
