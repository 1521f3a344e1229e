//! One open conversation screen.
//!
//! Each view owns a task that holds the message subscription and feeds
//! snapshots to its [`MessageStreamProcessor`] one at a time. Closing or
//! dropping the view stops the task; a snapshot still being processed at
//! that point is abandoned and nothing it produced is published.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use charla_shared::ConversationId;
use charla_store::DocumentStore;

use crate::error::Result;
use crate::stream::{MessageStreamProcessor, UiMessage};

pub struct ConversationView {
    conversation: ConversationId,
    rows: mpsc::UnboundedReceiver<Vec<UiMessage>>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ConversationView {
    /// Subscribe to the conversation and start processing snapshots.
    pub async fn open(
        documents: &Arc<dyn DocumentStore>,
        mut processor: MessageStreamProcessor,
    ) -> Result<Self> {
        let conversation = processor.conversation().clone();
        let mut subscription = documents.subscribe_messages(&conversation).await?;
        let (rows_tx, rows) = mpsc::unbounded_channel();
        let (cancel, mut cancelled) = oneshot::channel::<()>();

        let id = conversation.clone();
        let task = tokio::spawn(async move {
            loop {
                let snapshot = tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    snapshot = subscription.recv() => match snapshot {
                        Some(snapshot) => snapshot,
                        None => break,
                    },
                };
                let rendered = tokio::select! {
                    biased;
                    _ = &mut cancelled => break,
                    rendered = processor.on_snapshot(snapshot) => rendered,
                };
                if rows_tx.send(rendered).is_err() {
                    break;
                }
            }
            drop(subscription);
            debug!(conversation = %id, "conversation view stopped");
        });

        debug!(conversation = %conversation, "conversation view opened");
        Ok(Self {
            conversation,
            rows,
            cancel: Some(cancel),
            task: Some(task),
        })
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Rows of the next processed snapshot; `None` once the view has stopped.
    pub async fn next(&mut self) -> Option<Vec<UiMessage>> {
        self.rows.recv().await
    }

    /// Stop the view and wait until its subscription has been released.
    pub async fn close(mut self) {
        self.stop();
        if let Some(task) = self.task.take() {
            joined_cleanly(&self.conversation, task.await);
        }
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

fn joined_cleanly(
    conversation: &ConversationId,
    outcome: std::result::Result<(), JoinError>,
) -> bool {
    match outcome {
        Ok(()) => true,
        Err(e) => {
            warn!(conversation = %conversation, error = %e, "conversation view task failed");
            false
        }
    }
}

impl Drop for ConversationView {
    fn drop(&mut self) {
        self.stop();
    }
}
