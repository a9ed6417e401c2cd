#![forbid(unsafe_code)]
#![deny(
    warnings,
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::cargo,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Typed publish/subscribe buses with optional cross-context broadcast.
//!
//! Layout: `handler.rs` (handler model and the ordered handler list),
//! `bus.rs` (the shared bus contract), `serial.rs`/`parallel.rs` (local
//! dispatch strategies), `broadcast.rs` (local bus composed with a
//! transport messenger), `registry.rs` (lazy per-type bus map).

pub mod broadcast;
pub mod bus;
pub mod error;
pub mod handler;
pub mod parallel;
pub mod registry;
pub mod serial;

pub use broadcast::{BUS_CHANNEL_PREFIX, BroadcastEventBus};
pub use bus::EventBus;
pub use error::{BusError, BusResult};
pub use handler::{BoxError, EventHandler, HandlerResult, HandlerSnapshot};
pub use parallel::ParallelEventBus;
pub use registry::EventBusRegistry;
pub use serial::SerialEventBus;
