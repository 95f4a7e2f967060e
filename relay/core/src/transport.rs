//! Byte transport between the server-side relay and the client registry
//!
//! The driver forwards each chunk as UTF-8 bytes through a [`ChunkRelay`];
//! the registry consumes the other half as a [`ByteTransport`]. Chunk
//! boundaries are not preserved and may split multi-byte characters, so
//! readers must decode incrementally.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Transport-level failures seen by a reader
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The upstream provider failed mid-response
    #[error("upstream failed: {0}")]
    Upstream(String),
    /// The producer stopped before the response finished
    #[error("stream interrupted")]
    Interrupted,
}

/// Readable byte stream of one response
pub type ByteTransport = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Sending half of a relay channel
///
/// Sends never block. Once the reader hangs up, the relay is marked
/// detached and further sends are dropped.
#[derive(Debug)]
pub struct ChunkRelay {
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
    detached: AtomicBool,
}

impl ChunkRelay {
    /// Forward a text chunk
    pub fn send_chunk(&self, chunk: &str) -> bool {
        self.send(Ok(Bytes::copy_from_slice(chunk.as_bytes())))
    }

    /// Forward a failure; the reader sees it as its last item
    pub fn fail(&self, error: TransportError) -> bool {
        self.send(Err(error))
    }

    /// Whether the reader has gone away
    #[must_use]
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Relaxed) || self.tx.is_closed()
    }

    fn send(&self, item: Result<Bytes, TransportError>) -> bool {
        if self.detached.load(Ordering::Relaxed) {
            return false;
        }
        if self.tx.send(item).is_err() {
            self.detached.store(true, Ordering::Relaxed);
            tracing::debug!("Relay reader hung up, dropping further chunks");
            return false;
        }
        true
    }
}

/// Create a connected relay and transport
///
/// Dropping the relay ends the transport cleanly.
#[must_use]
pub fn relay_channel() -> (ChunkRelay, ByteTransport) {
    let (tx, rx) = mpsc::unbounded_channel();
    let relay = ChunkRelay {
        tx,
        detached: AtomicBool::new(false),
    };
    (relay, Box::pin(UnboundedReceiverStream::new(rx)))
}
