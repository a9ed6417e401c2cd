//! Bus error primitives.

use thiserror::Error;

/// Result alias for bus construction.
pub type BusResult<T> = Result<T, BusError>;

/// Errors raised while assembling buses.
///
/// Handler execution failures are deliberately absent: they are contained
/// inside `emit` and logged, never propagated.
#[derive(Debug, Error)]
pub enum BusError {
    /// No messenger was supplied and the transport factory produced none.
    /// A broadcast bus silently running local-only would violate its
    /// contract, so construction aborts instead.
    #[error("messenger setup failed: no transport available")]
    MessengerUnavailable {
        /// Channel the broadcast bus attempted to open.
        channel: String,
    },
}
