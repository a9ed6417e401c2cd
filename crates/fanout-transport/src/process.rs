//! Process-wide broadcast transport.
//!
//! The native-channel analog: every messenger on a channel shares one
//! process-wide broadcast sender, and each runs a forward task that hands
//! incoming frames to its registered handler. Frames are tagged with the
//! sending messenger's id so a sender never observes its own message.
//! Channel entries are reference-counted; closing the last messenger on a
//! channel drops its hub entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use serde_json::Value;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::messenger::{MessageHandler, Messenger};

/// In-flight frames buffered per channel before slow receivers lag.
const FRAME_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
struct Frame {
    sender: Uuid,
    data: Value,
}

struct ChannelSlot {
    sender: broadcast::Sender<Frame>,
    messengers: usize,
}

static HUB: OnceLock<Mutex<HashMap<String, ChannelSlot>>> = OnceLock::new();

fn hub() -> MutexGuard<'static, HashMap<String, ChannelSlot>> {
    HUB.get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}

fn acquire_channel(channel_name: &str) -> broadcast::Sender<Frame> {
    let mut channels = hub();
    let slot = channels
        .entry(channel_name.to_owned())
        .or_insert_with(|| ChannelSlot {
            sender: broadcast::channel(FRAME_CAPACITY).0,
            messengers: 0,
        });
    slot.messengers += 1;
    slot.sender.clone()
}

fn release_channel(channel_name: &str) {
    let mut channels = hub();
    if let Some(slot) = channels.get_mut(channel_name) {
        slot.messengers = slot.messengers.saturating_sub(1);
        if slot.messengers == 0 {
            channels.remove(channel_name);
        }
    }
}

/// Messenger backed by the process-wide broadcast hub.
pub struct ProcessMessenger {
    channel_name: String,
    id: Uuid,
    sender: broadcast::Sender<Frame>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
    forward: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl ProcessMessenger {
    /// Whether this transport can run in the current context. The receive
    /// loop needs an ambient tokio runtime.
    #[must_use]
    pub fn is_supported() -> bool {
        tokio::runtime::Handle::try_current().is_ok()
    }

    /// Open a messenger on the named channel.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; probe with
    /// [`Self::is_supported`] first.
    #[must_use]
    pub fn new(channel_name: &str) -> Self {
        let sender = acquire_channel(channel_name);
        let id = Uuid::new_v4();
        let handler: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

        let mut frames = sender.subscribe();
        let dispatch = Arc::clone(&handler);
        let forward = tokio::spawn(async move {
            loop {
                match frames.recv().await {
                    Ok(frame) => {
                        if frame.sender == id {
                            continue;
                        }
                        let callback = dispatch
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .clone();
                        if let Some(callback) = callback {
                            callback(frame.data);
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "process messenger fell behind; frames dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        Self {
            channel_name: channel_name.to_owned(),
            id,
            sender,
            handler,
            forward: Mutex::new(Some(forward)),
            closed: AtomicBool::new(false),
        }
    }
}

impl Messenger for ProcessMessenger {
    fn channel_name(&self) -> &str {
        &self.channel_name
    }

    fn post_message(&self, data: Value) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                channel: self.channel_name.clone(),
            });
        }
        // Our own receiver keeps the channel alive, so a send only fails
        // when every receiver is gone; those frames have no audience anyway.
        let _ = self.sender.send(Frame {
            sender: self.id,
            data,
        });
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(task) = self
            .forward
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        let _ = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        release_channel(&self.channel_name);
    }
}

impl Drop for ProcessMessenger {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn is_supported_inside_a_runtime() {
        assert!(ProcessMessenger::is_supported());
    }

    #[test]
    fn is_not_supported_without_a_runtime() {
        assert!(!ProcessMessenger::is_supported());
    }

    #[tokio::test]
    async fn closing_the_last_messenger_releases_the_channel() {
        let first = ProcessMessenger::new("process.release");
        let second = ProcessMessenger::new("process.release");

        first.close();
        assert!(hub().contains_key("process.release"));

        second.close();
        assert!(!hub().contains_key("process.release"));
    }

    #[tokio::test]
    async fn post_after_close_is_rejected() {
        let messenger = ProcessMessenger::new("process.closed");
        messenger.close();
        messenger.close();
        let error = messenger
            .post_message(Value::from("late"))
            .expect_err("closed messenger must reject sends");
        assert!(matches!(error, TransportError::Closed { .. }));
    }
}
