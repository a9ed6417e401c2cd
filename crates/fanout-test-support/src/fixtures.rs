//! Handler fixtures shared by bus test suites.

use std::sync::{Arc, Mutex, PoisonError};

use fanout_bus::{BoxError, EventHandler};

/// Shared log collecting the events a recording handler observed.
pub type EventLog<E> = Arc<Mutex<Vec<E>>>;

/// Fresh, empty event log.
#[must_use]
pub fn event_log<E>() -> EventLog<E> {
    Arc::new(Mutex::new(Vec::new()))
}

/// Events recorded so far.
#[must_use]
pub fn recorded<E: Clone>(log: &EventLog<E>) -> Vec<E> {
    log.lock().unwrap_or_else(PoisonError::into_inner).clone()
}

/// Handler appending every event it sees to `log`.
#[must_use]
pub fn recording_handler<E>(name: &str, order: i64, log: &EventLog<E>) -> EventHandler<E>
where
    E: Send + 'static,
{
    let log = Arc::clone(log);
    EventHandler::new(name, order, move |event| {
        let log = Arc::clone(&log);
        async move {
            log.lock().unwrap_or_else(PoisonError::into_inner).push(event);
            Ok(())
        }
    })
}

/// Handler that always fails with `reason`.
#[must_use]
pub fn failing_handler<E>(name: &str, order: i64, reason: &'static str) -> EventHandler<E>
where
    E: Send + 'static,
{
    EventHandler::new(name, order, move |_event| async move {
        let cause: BoxError = reason.into();
        Err(cause)
    })
}
