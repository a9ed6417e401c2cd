//! Lazy per-type bus map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::bus::EventBus;
use crate::handler::EventHandler;

type BusFactory<E> = Box<dyn Fn(&str) -> Arc<dyn EventBus<E>> + Send + Sync>;

/// Hands out one bus per logical event type, created on first access.
///
/// The injected factory decides what each type gets (serial, parallel or
/// broadcast); the registry only owns the map. All created buses share one
/// payload type; callers with heterogeneous payloads typically register a
/// registry over `serde_json::Value`.
pub struct EventBusRegistry<E> {
    factory: BusFactory<E>,
    buses: Mutex<HashMap<String, Arc<dyn EventBus<E>>>>,
}

impl<E> EventBusRegistry<E>
where
    E: Send + 'static,
{
    /// Build a registry around a per-type bus factory.
    pub fn new(factory: impl Fn(&str) -> Arc<dyn EventBus<E>> + Send + Sync + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            buses: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<dyn EventBus<E>>>> {
        self.buses.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The bus for `event_type`, creating it on first access.
    pub fn bus(&self, event_type: &str) -> Arc<dyn EventBus<E>> {
        let mut buses = self.lock();
        if let Some(bus) = buses.get(event_type) {
            return Arc::clone(bus);
        }
        let bus = (self.factory)(event_type);
        buses.insert(event_type.to_owned(), Arc::clone(&bus));
        bus
    }

    /// Register a handler on the bus for `event_type`.
    pub fn on(&self, event_type: &str, handler: EventHandler<E>) -> bool {
        self.bus(event_type).on(handler)
    }

    /// Remove a handler from the bus for `event_type`.
    pub fn off(&self, event_type: &str, name: &str) -> bool {
        self.bus(event_type).off(name)
    }

    /// Emit on the bus for `event_type`.
    pub async fn emit(&self, event_type: &str, event: E) {
        let bus = self.bus(event_type);
        bus.emit(event).await;
    }

    /// Number of buses created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no bus has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Destroy every created bus and forget them all.
    pub fn destroy(&self) {
        let buses: Vec<Arc<dyn EventBus<E>>> =
            self.lock().drain().map(|(_, bus)| bus).collect();
        for bus in buses {
            bus.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serial::SerialEventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn registry_with_counter() -> (EventBusRegistry<u32>, Arc<AtomicUsize>) {
        let created = Arc::new(AtomicUsize::new(0));
        let tally = Arc::clone(&created);
        let registry = EventBusRegistry::new(move |event_type: &str| {
            tally.fetch_add(1, Ordering::SeqCst);
            Arc::new(SerialEventBus::new(event_type)) as Arc<dyn EventBus<u32>>
        });
        (registry, created)
    }

    #[tokio::test]
    async fn buses_are_created_lazily_and_cached() {
        let (registry, created) = registry_with_counter();
        assert!(registry.is_empty());

        let progress = registry.bus("progress");
        assert_eq!(progress.event_type(), "progress");
        let again = registry.bus("progress");
        assert_eq!(again.event_type(), "progress");
        let _health = registry.bus("health");

        assert_eq!(created.load(Ordering::SeqCst), 2);
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn on_off_emit_are_keyed_by_type() {
        let (registry, _created) = registry_with_counter();
        let hits = Arc::new(AtomicUsize::new(0));
        let tally = Arc::clone(&hits);
        assert!(registry.on(
            "progress",
            EventHandler::new("track", 1, move |_event: u32| {
                let tally = Arc::clone(&tally);
                async move {
                    tally.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            })
        ));

        registry.emit("progress", 10).await;
        registry.emit("health", 10).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(registry.off("progress", "track"));
        assert!(!registry.off("progress", "track"));
    }

    #[tokio::test]
    async fn destroy_tears_down_every_created_bus() {
        let (registry, created) = registry_with_counter();
        let progress = registry.bus("progress");
        assert!(progress.on(EventHandler::new("track", 1, |_event: u32| async { Ok(()) })));

        registry.destroy();
        assert!(registry.is_empty());
        assert!(progress.handlers().is_empty());

        // Re-access after destroy builds a fresh bus.
        let _fresh = registry.bus("progress");
        assert_eq!(created.load(Ordering::SeqCst), 2);
    }
}
