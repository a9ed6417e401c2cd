//! Handler model shared by every bus implementation.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

/// Boxed error type returned by failing handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Outcome of a single handler execution.
pub type HandlerResult = Result<(), BoxError>;

type HandlerFn<E> = Arc<dyn Fn(E) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A named, ordered callback registered on a bus.
///
/// Identity is the `name`; `order` determines dispatch position (ascending),
/// with ties broken by relative registration order. A handler marked `once`
/// runs on at most one emit and is removed afterwards, even when that run
/// fails.
pub struct EventHandler<E> {
    name: String,
    order: i64,
    once: bool,
    handle: HandlerFn<E>,
}

impl<E> EventHandler<E> {
    /// Build a handler from an async callback.
    pub fn new<F, Fut>(name: impl Into<String>, order: i64, handle: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        Self {
            name: name.into(),
            order,
            once: false,
            handle: Arc::new(move |event| handle(event).boxed()),
        }
    }

    /// Mark the handler as one-shot.
    #[must_use]
    pub fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Handler identity within its bus.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch position; lower orders run first.
    #[must_use]
    pub const fn order(&self) -> i64 {
        self.order
    }

    /// Whether the handler is removed after its first execution.
    #[must_use]
    pub const fn is_once(&self) -> bool {
        self.once
    }

    pub(crate) fn invoke(&self, event: E) -> BoxFuture<'static, HandlerResult> {
        (self.handle)(event)
    }
}

impl<E> Clone for EventHandler<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            order: self.order,
            once: self.once,
            handle: Arc::clone(&self.handle),
        }
    }
}

impl<E> fmt::Debug for EventHandler<E> {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("EventHandler")
            .field("name", &self.name)
            .field("order", &self.order)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a registered handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerSnapshot {
    /// Handler identity within its bus.
    pub name: String,
    /// Dispatch position.
    pub order: i64,
    /// Whether the handler is one-shot.
    pub once: bool,
}

/// Ordered handler collection with copy-on-write dispatch snapshots.
///
/// The list is kept sorted by `order` (stable for equal orders) at every
/// observation point; `snapshot` hands dispatchers an owned copy so
/// registrations and removals during an emit only affect later emits.
pub(crate) struct HandlerList<E> {
    inner: Mutex<Vec<EventHandler<E>>>,
}

impl<E> HandlerList<E> {
    pub(crate) const fn new() -> Self {
        Self {
            inner: Mutex::new(Vec::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<EventHandler<E>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a handler, keeping the list sorted. Returns `false` and leaves
    /// the list untouched when the name is already taken.
    pub(crate) fn insert(&self, handler: EventHandler<E>) -> bool {
        let mut list = self.lock();
        if list.iter().any(|existing| existing.name == handler.name) {
            return false;
        }
        list.push(handler);
        list.sort_by_key(EventHandler::order);
        true
    }

    pub(crate) fn remove(&self, name: &str) -> bool {
        let mut list = self.lock();
        let before = list.len();
        list.retain(|handler| handler.name != name);
        list.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<EventHandler<E>> {
        self.lock().clone()
    }

    pub(crate) fn describe(&self) -> Vec<HandlerSnapshot> {
        self.lock()
            .iter()
            .map(|handler| HandlerSnapshot {
                name: handler.name.clone(),
                order: handler.order,
                once: handler.once,
            })
            .collect()
    }

    /// Drop every handler whose name appears in `names`, in one pass.
    pub(crate) fn retire(&self, names: &[String]) {
        if names.is_empty() {
            return;
        }
        let mut list = self.lock();
        list.retain(|handler| !names.iter().any(|name| name == &handler.name));
        list.sort_by_key(EventHandler::order);
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
