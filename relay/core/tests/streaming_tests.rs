//! Integration tests for the server-side stream driver
//!
//! Tests cover:
//! - Persisted message lifecycle against the in-memory store
//! - Ordering of partial and terminal writes with a slow sink
//! - Live relay of chunks into a registry

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use relay_core::backend::StreamingToken;
use relay_core::messages::{ConversationId, MessageId, TeamId};
use relay_core::persistence::{ConversationStore, InMemoryStore, PersistenceSink, StoreError};
use relay_core::registry::{ChatStreamRegistry, StreamStatus};
use relay_core::streaming::{DriverConfig, DriverError, ResponseStatus, StreamDriver};
use relay_core::transport::relay_channel;

fn token(text: &str) -> StreamingToken {
    StreamingToken::Token(text.to_string())
}

fn complete(text: &str) -> StreamingToken {
    StreamingToken::Complete {
        message: text.to_string(),
    }
}

/// Sink whose partial writes are slow; records what it saw and when
#[derive(Default)]
struct SlowSink {
    log: Mutex<Vec<(String, bool)>>,
}

#[async_trait]
impl PersistenceSink for SlowSink {
    async fn create_assistant_message(
        &self,
        _conversation_id: &ConversationId,
    ) -> Result<MessageId, StoreError> {
        Ok(MessageId::new())
    }

    async fn write_partial(&self, _id: &MessageId, content: &str) -> Result<(), StoreError> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.log.lock().push((content.to_string(), false));
        Ok(())
    }

    async fn write_final(&self, _id: &MessageId, content: &str) -> Result<(), StoreError> {
        self.log.lock().push((content.to_string(), true));
        Ok(())
    }
}

#[tokio::test]
async fn test_driver_persists_to_store() {
    let store = Arc::new(InMemoryStore::new());
    let conv = store
        .create_conversation(&TeamId::from("team"))
        .await
        .unwrap();
    let driver = StreamDriver::new(store.clone(), DriverConfig::default());

    let events = vec![
        token("Hel"),
        token("lo, "),
        token("world!"),
        complete("Hello, world!"),
    ];
    let outcome = driver
        .drive(&conv.id, futures::stream::iter(events), None, None)
        .await
        .unwrap();

    let message = store.message(&outcome.message_id).unwrap();
    assert_eq!(message.content, "Hello, world!");
    assert!(message.completed);
    assert!(!message.streaming);

    // Immutable after the terminal write
    tokio_test::assert_err!(store.write_partial(&outcome.message_id, "late").await);
}

#[tokio::test]
async fn test_slow_partials_still_precede_final() {
    let sink = Arc::new(SlowSink::default());
    let driver = StreamDriver::new(
        sink.clone(),
        DriverConfig {
            writer_coalesce: false,
            ..DriverConfig::default()
        },
    );

    let (tx, rx) = mpsc::channel(16);
    let producer = tokio::spawn(async move {
        for chunk in ["One.", " Two.", " Three.", " Four"] {
            tx.send(token(chunk)).await.unwrap();
            tokio::task::yield_now().await;
        }
        tx.send(complete("One. Two. Three. Four")).await.unwrap();
    });

    let outcome = driver
        .drive(
            &ConversationId::from("c"),
            ReceiverStream::new(rx),
            None,
            None,
        )
        .await
        .unwrap();
    producer.await.unwrap();

    let log = sink.log.lock().clone();
    assert_eq!(
        log,
        vec![
            ("One.".to_string(), false),
            ("One. Two.".to_string(), false),
            ("One. Two. Three.".to_string(), false),
            ("One. Two. Three. Four".to_string(), true),
        ]
    );
    assert_eq!(outcome.partial_writes, 3);
    assert_eq!(outcome.status, ResponseStatus::Completed);
}

#[tokio::test]
async fn test_exactly_one_final_per_response() {
    let sink = Arc::new(SlowSink::default());
    let driver = StreamDriver::new(sink.clone(), DriverConfig::default());

    let cases: Vec<Vec<StreamingToken>> = vec![
        vec![complete("")],
        vec![token("a."), complete("a.")],
        vec![token("a."), StreamingToken::Error("x".into())],
        vec![token("a.")],
    ];

    for events in cases {
        sink.log.lock().clear();
        let _ = driver
            .drive(
                &ConversationId::from("c"),
                futures::stream::iter(events),
                None,
                None,
            )
            .await;

        let log = sink.log.lock().clone();
        assert_eq!(log.iter().filter(|(_, terminal)| *terminal).count(), 1);
        assert!(log.last().is_some_and(|(_, terminal)| *terminal));
    }
}

#[tokio::test]
async fn test_missing_conversation_is_reported() {
    let store = Arc::new(InMemoryStore::new());
    let driver = StreamDriver::new(store.clone(), DriverConfig::default());

    let err = driver
        .drive(
            &ConversationId::from("missing"),
            futures::stream::iter(vec![complete("x")]),
            None,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Create(StoreError::ConversationNotFound(_))));
    assert_eq!(store.message_count(), 0);
}

#[tokio::test]
async fn test_relay_feeds_registry() {
    let store = Arc::new(InMemoryStore::new());
    let conv = store
        .create_conversation(&TeamId::from("team"))
        .await
        .unwrap();
    let driver = StreamDriver::new(store.clone(), DriverConfig::default());
    let registry = ChatStreamRegistry::new(store.clone());
    let (relay, transport) = relay_channel();

    let events = vec![token("Stream"), token("ed "), token("ñ"), complete("Streamed ñ")];
    let (outcome, status) = tokio::join!(
        driver.drive(&conv.id, futures::stream::iter(events), Some(relay), None),
        registry.start_chat_stream(&conv.id, transport, None),
    );

    let outcome = outcome.unwrap();
    assert_eq!(status, StreamStatus::Done);

    let visible = registry.get_messages(&conv.id);
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].content, outcome.content);
}
