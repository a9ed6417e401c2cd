//! The contract shared by every bus implementation.

use async_trait::async_trait;

use crate::handler::{EventHandler, HandlerSnapshot};

/// An addressable collection of ordered handlers for one event type.
///
/// Implementations guarantee unique handler names, a handler list that is
/// sorted by `order` at every observation point, and failure isolation:
/// one handler failing never prevents its siblings from running and never
/// surfaces out of [`EventBus::emit`].
#[async_trait]
pub trait EventBus<E>: Send + Sync {
    /// Logical event type carried by this bus; doubles as the channel key
    /// when the bus is broadcast across contexts.
    fn event_type(&self) -> &str;

    /// Read-only snapshot of the registered handlers, sorted by order.
    fn handlers(&self) -> Vec<HandlerSnapshot>;

    /// Register a handler. Returns `false`, changing nothing, when a
    /// handler with the same name is already registered.
    fn on(&self, handler: EventHandler<E>) -> bool;

    /// Remove the handler with the given name. Returns `false` when no such
    /// handler exists.
    fn off(&self, name: &str) -> bool;

    /// Dispatch `event` to the handlers registered at the start of the
    /// call. Handler failures are logged and contained; the returned future
    /// resolves once every handler has settled.
    async fn emit(&self, event: E);

    /// Release whatever the bus owns. Local buses drop their handler list;
    /// broadcast buses close their messenger.
    fn destroy(&self);
}
