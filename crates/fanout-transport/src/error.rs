//! # Design
//!
//! - Structured, constant-message errors for the transport layer.
//! - Capture operation context (operation name, path or key) so failures
//!   are reproducible in tests.
//! - Preserve source errors without interpolating context into messages.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for key-value store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors produced by key-value store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO failures while touching the backing storage.
    #[error("store io failure")]
    Io {
        /// Operation that triggered the IO failure.
        operation: &'static str,
        /// Path involved in the IO failure.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// Filesystem watcher failures.
    #[error("store watch failure")]
    Watch {
        /// Operation that triggered the watcher failure.
        operation: &'static str,
        /// Path involved in the watcher failure.
        path: PathBuf,
        /// Underlying watcher error.
        source: notify::Error,
    },
}

impl StoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub(crate) fn watch(
        operation: &'static str,
        path: impl Into<PathBuf>,
        source: notify::Error,
    ) -> Self {
        Self::Watch {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Result type for messenger operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors surfaced by messengers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The messenger was closed and can no longer send.
    #[error("messenger closed")]
    Closed {
        /// Channel the messenger was bound to.
        channel: String,
    },
    /// Envelope serialization failed.
    #[error("message encode failure")]
    Encode {
        /// Underlying JSON error.
        source: serde_json::Error,
    },
    /// The backing store rejected a message write.
    #[error("message store failure")]
    Store {
        /// Underlying store error.
        #[from]
        source: StoreError,
    },
}
