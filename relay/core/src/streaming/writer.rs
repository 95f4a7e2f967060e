//! Detached persistence writer
//!
//! One background task per response applies writes to the sink in FIFO
//! order. Partial writes are enqueued without waiting and their failures
//! are logged, never returned. The final write is queued behind every
//! partial and its result is awaited, so the sink always sees the terminal
//! write last.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::messages::MessageId;
use crate::persistence::{PersistenceSink, StoreError};

enum WriteCommand {
    Partial(String),
    Final {
        content: String,
        reply: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Handle to the background writer of one message
pub struct PersistenceWriter {
    sink: Arc<dyn PersistenceSink>,
    message_id: MessageId,
    tx: mpsc::UnboundedSender<WriteCommand>,
    task: JoinHandle<()>,
}

impl PersistenceWriter {
    /// Spawn the writer task for `message_id`
    ///
    /// With `coalesce`, partials that are still queued when a newer one is
    /// queued behind them are skipped.
    #[must_use]
    pub fn spawn(sink: Arc<dyn PersistenceSink>, message_id: MessageId, coalesce: bool) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_writer(
            Arc::clone(&sink),
            message_id.clone(),
            rx,
            coalesce,
        ));
        Self {
            sink,
            message_id,
            tx,
            task,
        }
    }

    /// Queue a partial write without waiting for it
    ///
    /// Returns false if the writer task is gone.
    pub fn enqueue_partial(&self, content: impl Into<String>) -> bool {
        self.tx.send(WriteCommand::Partial(content.into())).is_ok()
    }

    /// Queue the terminal write behind all partials and wait for it
    ///
    /// If the writer task is no longer running, the final write is
    /// performed directly so it is never skipped.
    pub async fn finish(self, content: &str) -> Result<(), StoreError> {
        let (reply, response) = oneshot::channel();
        let queued = self
            .tx
            .send(WriteCommand::Final {
                content: content.to_string(),
                reply,
            })
            .is_ok();

        if queued {
            if let Ok(result) = response.await {
                return result;
            }
        }

        tracing::warn!(
            message_id = %self.message_id,
            "Persistence writer gone, writing final content directly"
        );
        self.task.abort();
        self.sink.write_final(&self.message_id, content).await
    }
}

async fn run_writer(
    sink: Arc<dyn PersistenceSink>,
    message_id: MessageId,
    mut rx: mpsc::UnboundedReceiver<WriteCommand>,
    coalesce: bool,
) {
    let mut deferred: Option<WriteCommand> = None;

    loop {
        let command = match deferred.take() {
            Some(command) => command,
            None => match rx.recv().await {
                Some(command) => command,
                None => return,
            },
        };

        match command {
            WriteCommand::Partial(mut content) => {
                if coalesce {
                    // Skip to the newest queued partial; keep a queued final for later
                    while let Ok(next) = rx.try_recv() {
                        match next {
                            WriteCommand::Partial(newer) => content = newer,
                            final_write @ WriteCommand::Final { .. } => {
                                deferred = Some(final_write);
                                break;
                            }
                        }
                    }
                }

                if let Err(e) = sink.write_partial(&message_id, &content).await {
                    tracing::warn!(
                        message_id = %message_id,
                        error = %e,
                        "Partial write failed, continuing"
                    );
                } else {
                    tracing::debug!(
                        message_id = %message_id,
                        len = content.len(),
                        "Partial write applied"
                    );
                }
            }
            WriteCommand::Final { content, reply } => {
                let result = sink.write_final(&message_id, &content).await;
                if let Err(ref e) = result {
                    tracing::error!(message_id = %message_id, error = %e, "Final write failed");
                }
                let _ = reply.send(result);
                return;
            }
        }
    }
}
