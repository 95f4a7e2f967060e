//! Server-Side Response Streaming
//!
//! Turns a provider's token stream into one persisted assistant message
//! while relaying the raw chunks to a live reader.
//!
//! # Architecture
//!
//! ```text
//!  provider ──StreamingToken──▶ StreamDriver ──chunks──▶ ChunkRelay ──▶ reader
//!                                   │
//!                      ResponseAccumulator + should_flush
//!                                   │
//!                          PersistenceWriter (detached task)
//!                       Partial, Partial, ..., Final (awaited)
//!                                   │
//!                                   ▼
//!                            PersistenceSink
//! ```
//!
//! # Guarantees
//!
//! - Exactly one terminal write per driven response, issued after every
//!   chunk has been processed and after every partial write.
//! - Partial writes are never awaited by the consumption loop; their
//!   failures are logged and otherwise ignored.
//! - Persisted content only grows until the terminal write, which may
//!   replace it with the provider's authoritative text.

mod accumulator;
mod driver;
mod session;
mod writer;

pub use accumulator::ResponseAccumulator;
pub use driver::{
    DriverConfig, DriverError, ResponseOutcome, ResponseStatus, StreamDriver, ENDED_EARLY,
};
pub use session::{SessionPhase, StreamSession};
pub use writer::PersistenceWriter;

// Re-export StreamingToken from backend for convenience
pub use crate::backend::StreamingToken;
