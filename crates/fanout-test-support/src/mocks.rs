//! Scripted messenger double for broadcast-bus tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use fanout_transport::{MessageHandler, Messenger, TransportResult};

/// Messenger that records outgoing posts and lets tests inject incoming
/// messages, standing in for a real cross-context transport.
#[derive(Default)]
pub struct StubMessenger {
    posted: Mutex<Vec<Value>>,
    handler: Mutex<Option<MessageHandler>>,
    closes: AtomicUsize,
}

impl StubMessenger {
    /// Shared stub, ready to hand to a broadcast bus.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Payloads posted through this messenger so far.
    #[must_use]
    pub fn posted(&self) -> Vec<Value> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `close` has been called.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Push an incoming message through the registered handler, exactly as
    /// the transport would for a message from another context.
    pub fn deliver(&self, payload: Value) {
        let callback = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(callback) = callback {
            callback(payload);
        }
    }
}

impl Messenger for StubMessenger {
    fn channel_name(&self) -> &str {
        "stub"
    }

    fn post_message(&self, data: Value) -> TransportResult<()> {
        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(data);
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
