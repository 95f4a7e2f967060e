//! Line-oriented response pumping
//!
//! Both supported providers stream newline-delimited payloads (NDJSON for
//! Ollama, SSE `data:` lines for OpenAI-compatible APIs). This module turns
//! a raw byte stream into [`StreamingToken`]s given a per-line parser.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;

use super::traits::StreamingToken;

/// What a single provider line means
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum LineEvent {
    /// Nothing to forward (keep-alive, comment, empty delta)
    Skip,
    /// A text delta
    Token(String),
    /// Provider signalled the end of the response
    Done,
    /// Provider reported an error in-band
    Fail(String),
}

/// Splits a byte stream into complete lines, keeping partial lines
/// (including split UTF-8 sequences) until their newline arrives.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed bytes, returning every line completed by them
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let text = String::from_utf8_lossy(&line[..line.len() - 1]);
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
        lines
    }

    /// Whatever is left once the stream ends
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        let text = String::from_utf8_lossy(&rest);
        let trimmed = text.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }
}

/// Spawn a task forwarding parsed lines from `body` into `tx`
///
/// Guarantees the receiver sees exactly one `Complete` or `Error` unless it
/// hangs up first.
pub(crate) fn spawn_line_pump<S, E, F>(body: S, tx: mpsc::Sender<StreamingToken>, parse: F)
where
    S: Stream<Item = Result<Bytes, E>> + Send + Unpin + 'static,
    E: std::fmt::Display + Send + 'static,
    F: FnMut(&str) -> LineEvent + Send + 'static,
{
    tokio::spawn(pump_lines(body, tx, parse));
}

pub(crate) async fn pump_lines<S, E, F>(mut body: S, tx: mpsc::Sender<StreamingToken>, mut parse: F)
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
    F: FnMut(&str) -> LineEvent,
{
    let mut splitter = LineSplitter::default();
    let mut full_response = String::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                return;
            }
        };

        for line in splitter.push(&bytes) {
            match parse(&line) {
                LineEvent::Skip => {}
                LineEvent::Token(text) => {
                    full_response.push_str(&text);
                    if tx.send(StreamingToken::Token(text)).await.is_err() {
                        // Receiver dropped, stop streaming
                        return;
                    }
                }
                LineEvent::Done => {
                    let _ = tx
                        .send(StreamingToken::Complete {
                            message: full_response,
                        })
                        .await;
                    return;
                }
                LineEvent::Fail(error) => {
                    let _ = tx.send(StreamingToken::Error(error)).await;
                    return;
                }
            }
        }
    }

    if let Some(line) = splitter.finish() {
        match parse(&line) {
            LineEvent::Token(text) => {
                full_response.push_str(&text);
                let _ = tx.send(StreamingToken::Token(text)).await;
            }
            LineEvent::Fail(error) => {
                let _ = tx.send(StreamingToken::Error(error)).await;
                return;
            }
            LineEvent::Skip | LineEvent::Done => {}
        }
    }

    // Body ended without an explicit done marker
    let last = if full_response.is_empty() {
        StreamingToken::Error("provider stream ended without a response".to_string())
    } else {
        StreamingToken::Complete {
            message: full_response,
        }
    };
    let _ = tx.send(last).await;
}
