//! Local bus composed with a cross-context messenger.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{error, warn};

use fanout_transport::{Messenger, create_messenger};

use crate::bus::EventBus;
use crate::error::{BusError, BusResult};
use crate::handler::{EventHandler, HandlerSnapshot};

/// Prefix prepended to the delegate's event type when deriving the
/// messenger channel name.
pub const BUS_CHANNEL_PREFIX: &str = "fanout.bus.";

/// Bus that mirrors every local emit to other execution contexts.
///
/// Local dispatch goes through the wrapped delegate bus; the messenger
/// relays the serialized event to every other context on the channel, and
/// events arriving from other contexts are injected straight into the
/// delegate. The transport is relied upon never to deliver a sender's own
/// message back to it, which is what keeps the relay loop-free.
///
/// The delegate is referenced, not owned: [`BroadcastEventBus::destroy`]
/// closes the messenger and leaves the delegate's handler list to whoever
/// created it.
pub struct BroadcastEventBus<E> {
    delegate: Arc<dyn EventBus<E>>,
    messenger: Arc<dyn Messenger>,
}

impl<E> std::fmt::Debug for BroadcastEventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastEventBus").finish_non_exhaustive()
    }
}

impl<E> BroadcastEventBus<E>
where
    E: Serialize + DeserializeOwned + Send + 'static,
{
    /// Wrap `delegate` with a messenger obtained from the transport
    /// factory, on the channel [`BUS_CHANNEL_PREFIX`] plus the delegate's
    /// event type.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MessengerUnavailable`] when the factory yields
    /// no transport. Broadcast capability is the whole point of this bus,
    /// so there is no degraded local-only mode.
    pub fn new(delegate: Arc<dyn EventBus<E>>) -> BusResult<Self> {
        let channel = format!("{BUS_CHANNEL_PREFIX}{}", delegate.event_type());
        let Some(messenger) = create_messenger(&channel) else {
            return Err(BusError::MessengerUnavailable { channel });
        };
        Ok(Self::with_messenger(delegate, Arc::from(messenger)))
    }

    /// Wrap `delegate` with an explicitly supplied messenger.
    pub fn with_messenger(delegate: Arc<dyn EventBus<E>>, messenger: Arc<dyn Messenger>) -> Self {
        let receiver = Arc::clone(&delegate);
        messenger.set_message_handler(Arc::new(move |payload| {
            match serde_json::from_value::<E>(payload) {
                Ok(event) => {
                    // Injected into the delegate only; re-posting here would
                    // relay the message forever between contexts.
                    let delegate = Arc::clone(&receiver);
                    drop(tokio::spawn(async move { delegate.emit(event).await }));
                }
                Err(cause) => {
                    warn!(error = %cause, "dropping undecodable broadcast payload");
                }
            }
        }));
        Self {
            delegate,
            messenger,
        }
    }

    /// Channel the underlying messenger is bound to.
    #[must_use]
    pub fn channel_name(&self) -> &str {
        self.messenger.channel_name()
    }
}

#[async_trait]
impl<E> EventBus<E> for BroadcastEventBus<E>
where
    E: Serialize + DeserializeOwned + Send + 'static,
{
    fn event_type(&self) -> &str {
        self.delegate.event_type()
    }

    fn handlers(&self) -> Vec<HandlerSnapshot> {
        self.delegate.handlers()
    }

    fn on(&self, handler: EventHandler<E>) -> bool {
        self.delegate.on(handler)
    }

    fn off(&self, name: &str) -> bool {
        self.delegate.off(name)
    }

    async fn emit(&self, event: E) {
        let payload = serde_json::to_value(&event);
        self.delegate.emit(event).await;
        match payload {
            Ok(value) => {
                if let Err(cause) = self.messenger.post_message(value) {
                    error!(
                        channel = %self.messenger.channel_name(),
                        error = %cause,
                        "failed to relay event to other contexts"
                    );
                }
            }
            Err(cause) => {
                error!(
                    channel = %self.messenger.channel_name(),
                    error = %cause,
                    "event payload is not serializable; dispatched locally only"
                );
            }
        }
    }

    /// Close the messenger. The delegate bus stays registered and usable;
    /// its lifecycle belongs to the caller that created it.
    fn destroy(&self) {
        self.messenger.close();
    }
}
