//! Concurrent local dispatch with joint settlement.

use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::error;

use crate::bus::EventBus;
use crate::handler::{EventHandler, HandlerList, HandlerSnapshot};

/// Bus that starts every handler without waiting for the previous one.
///
/// Handlers are fired in list order but complete independently; no ordering
/// is guaranteed between their observable side effects. `emit` resolves
/// only once every handler has settled. Registration, removal and
/// once-handling semantics match [`crate::SerialEventBus`].
pub struct ParallelEventBus<E> {
    event_type: String,
    handlers: HandlerList<E>,
}

impl<E> ParallelEventBus<E> {
    /// Create an empty bus for the given event type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            handlers: HandlerList::new(),
        }
    }
}

#[async_trait]
impl<E> EventBus<E> for ParallelEventBus<E>
where
    E: Clone + Send + 'static,
{
    fn event_type(&self) -> &str {
        &self.event_type
    }

    fn handlers(&self) -> Vec<HandlerSnapshot> {
        self.handlers.describe()
    }

    fn on(&self, handler: EventHandler<E>) -> bool {
        self.handlers.insert(handler)
    }

    fn off(&self, name: &str) -> bool {
        self.handlers.remove(name)
    }

    async fn emit(&self, event: E) {
        let snapshot = self.handlers.snapshot();
        let passes = snapshot.iter().map(|handler| {
            let name = handler.name().to_owned();
            let run = handler.invoke(event.clone());
            async move { (name, run.await) }
        });

        for (name, outcome) in join_all(passes).await {
            if let Err(cause) = outcome {
                error!(
                    bus = %self.event_type,
                    handler = %name,
                    error = %cause,
                    "event handler failed"
                );
            }
        }

        let retired: Vec<String> = snapshot
            .iter()
            .filter(|handler| handler.is_once())
            .map(|handler| handler.name().to_owned())
            .collect();
        self.handlers.retire(&retired);
    }

    fn destroy(&self) {
        self.handlers.clear();
    }
}
