//! Delayed deletion of ephemeral messages
//!
//! Acknowledgements sent to contacts disappear after a fixed delay. Each
//! pending deletion is a spawned task registered under the message it will
//! delete, so it can be cancelled individually or all at once. Tasks left
//! pending at shutdown are simply abandoned and the message stays.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::messenger::{MessageRef, Messenger};

/// Registry of pending message deletions
#[derive(Clone)]
pub struct DeletionScheduler {
    messenger: Arc<dyn Messenger>,
    delay: Duration,
    pending: Arc<Mutex<HashMap<MessageRef, AbortHandle>>>,
}

impl DeletionScheduler {
    pub fn new(messenger: Arc<dyn Messenger>, delay: Duration) -> Self {
        Self {
            messenger,
            delay,
            pending: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Delete `message` once the delay elapses. Rescheduling the same message
    /// replaces the earlier timer.
    pub fn schedule(&self, message: MessageRef) {
        let messenger = Arc::clone(&self.messenger);
        let pending = Arc::clone(&self.pending);
        let delay = self.delay;

        let mut registry = self.pending.lock();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            pending.lock().remove(&message);
            match messenger.delete_message(message).await {
                Ok(()) => debug!("Deleted ephemeral message {} in chat {}", message.message_id, message.chat_id),
                Err(e) => warn!(
                    "Failed to delete ephemeral message {} in chat {}: {}",
                    message.message_id, message.chat_id, e
                ),
            }
        });

        if let Some(previous) = registry.insert(message, task.abort_handle()) {
            previous.abort();
        }
    }

    /// Cancel a pending deletion. `false` if none was pending.
    pub fn cancel(&self, message: &MessageRef) -> bool {
        match self.pending.lock().remove(message) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Cancel everything still pending; returns how many were cancelled
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self.pending.lock().drain().map(|(_, h)| h).collect();
        for handle in &drained {
            handle.abort();
        }
        drained.len()
    }

    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}
