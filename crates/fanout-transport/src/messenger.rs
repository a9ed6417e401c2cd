//! The transport seam between execution contexts.

use std::sync::Arc;

use serde_json::Value;

use crate::error::TransportResult;
use crate::process::ProcessMessenger;

/// Callback receiving decoded message payloads.
///
/// Exactly one handler is active per messenger; installing a new one
/// replaces the previous. The callback receives the payload only, never a
/// raw transport event.
pub type MessageHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Moves a message between same-channel execution contexts.
///
/// Implementations guarantee that a sender never receives its own message
/// back; the broadcast bus depends on that property to stay loop-free.
pub trait Messenger: Send + Sync {
    /// Channel this messenger operates under.
    fn channel_name(&self) -> &str;

    /// Send `data` to every other context on the channel.
    ///
    /// # Errors
    ///
    /// Fails when the messenger is closed or the underlying transport
    /// rejects the write.
    fn post_message(&self, data: Value) -> TransportResult<()>;

    /// Install the receive callback, replacing any previous one.
    fn set_message_handler(&self, handler: MessageHandler);

    /// Release every platform listener and timer the messenger holds.
    /// Idempotent; nothing is dispatched after the first close, and the
    /// messenger must not be reused.
    fn close(&self);
}

/// Pick the best transport available in the current context.
///
/// Returns `None` when no transport can run here; whether that is fatal is
/// the caller's decision.
#[must_use]
pub fn create_messenger(channel_name: &str) -> Option<Box<dyn Messenger>> {
    if ProcessMessenger::is_supported() {
        return Some(Box::new(ProcessMessenger::new(channel_name)));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn factory_yields_a_transport_inside_a_runtime() {
        let messenger = create_messenger("factory.check").expect("runtime present");
        assert_eq!(messenger.channel_name(), "factory.check");
        messenger.close();
    }

    #[test]
    fn factory_yields_nothing_without_a_runtime() {
        assert!(create_messenger("factory.check").is_none());
    }
}
