//! Strictly ordered, one-at-a-time local dispatch.

use async_trait::async_trait;
use tracing::error;

use crate::bus::EventBus;
use crate::handler::{EventHandler, HandlerList, HandlerSnapshot};

/// Bus that awaits each handler to completion before starting the next.
///
/// Dispatch runs over a snapshot captured when `emit` starts, so handlers
/// registered or removed mid-emit only affect later emits. A handler whose
/// promise never settles stalls the remaining handlers indefinitely; the
/// bus provides no timeout or cancellation.
pub struct SerialEventBus<E> {
    event_type: String,
    handlers: HandlerList<E>,
}

impl<E> SerialEventBus<E> {
    /// Create an empty bus for the given event type.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            handlers: HandlerList::new(),
        }
    }
}

#[async_trait]
impl<E> EventBus<E> for SerialEventBus<E>
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
        let mut retired = Vec::new();
        for handler in &snapshot {
            if let Err(cause) = handler.invoke(event.clone()).await {
                error!(
                    bus = %self.event_type,
                    handler = %handler.name(),
                    error = %cause,
                    "event handler failed"
                );
            }
            if handler.is_once() {
                retired.push(handler.name().to_owned());
            }
        }
        self.handlers.retire(&retired);
    }

    fn destroy(&self) {
        self.handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};

    fn counting(name: &str, order: i64, hits: &Arc<AtomicUsize>) -> EventHandler<u32> {
        let hits = Arc::clone(hits);
        EventHandler::new(name, order, move |_event| {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
    }

    #[tokio::test]
    async fn emit_runs_handlers_in_order() {
        let bus = SerialEventBus::new("orders");
        let seen: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        for (name, order) in [("second", 2), ("first", 1), ("third", 3)] {
            let seen = Arc::clone(&seen);
            assert!(bus.on(EventHandler::new(name, order, move |_event: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap_or_else(PoisonError::into_inner).push(name);
                    Ok(())
                }
            })));
        }

        bus.emit(7).await;
        let order = seen.lock().unwrap_or_else(PoisonError::into_inner).clone();
        assert_eq!(order, ["first", "second", "third"]);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_without_mutation() {
        let bus = SerialEventBus::new("dups");
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(bus.on(counting("dup", 1, &hits)));
        assert!(!bus.on(counting("dup", 5, &hits)));

        let snapshot = bus.handlers();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].order, 1);
    }

    #[tokio::test]
    async fn once_handler_runs_exactly_once_even_when_it_fails() {
        let bus = SerialEventBus::new("flaky");
        let attempts = Arc::new(AtomicUsize::new(0));
        let tally = Arc::clone(&attempts);
        assert!(bus.on(
            EventHandler::new("boom", 1, move |_event: u32| {
                let tally = Arc::clone(&tally);
                async move {
                    tally.fetch_add(1, Ordering::SeqCst);
                    Err("always fails".into())
                }
            })
            .once()
        ));

        bus.emit(1).await;
        bus.emit(2).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(bus.handlers().is_empty());
        assert!(!bus.off("boom"));
    }

    #[tokio::test]
    async fn failing_handler_does_not_stop_siblings() {
        let bus = SerialEventBus::new("mixed");
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(bus.on(EventHandler::new("bad", 1, |_event: u32| async {
            Err("broken".into())
        })));
        assert!(bus.on(counting("good", 2, &hits)));

        bus.emit(0).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handlers().len(), 2);
    }

    #[tokio::test]
    async fn off_missing_returns_false_and_changes_nothing() {
        let bus = SerialEventBus::new("sparse");
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(bus.on(counting("present", 1, &hits)));
        assert!(!bus.off("missing"));
        assert_eq!(bus.handlers().len(), 1);
    }

    #[tokio::test]
    async fn destroy_clears_the_handler_list() {
        let bus = SerialEventBus::new("doomed");
        let hits = Arc::new(AtomicUsize::new(0));
        assert!(bus.on(counting("gone", 1, &hits)));
        bus.destroy();
        assert!(bus.handlers().is_empty());
        bus.emit(3).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
