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

//! Transports moving messages between execution contexts that do not share
//! memory.
//!
//! Layout: `messenger.rs` (the transport seam and the factory),
//! `process.rs` (process-wide broadcast hub), `kv.rs` (key-value stores
//! with change feeds), `store.rs` (store-backed fallback transport with
//! TTL-based garbage collection).

pub mod error;
pub mod kv;
pub mod messenger;
pub mod process;
pub mod store;

pub use error::{StoreError, StoreResult, TransportError, TransportResult};
pub use kv::{DirStore, KeyValueStore, MemoryStore, StoreChange};
pub use messenger::{MessageHandler, Messenger, create_messenger};
pub use process::ProcessMessenger;
pub use store::{
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_TTL, MessageEnvelope, STORE_KEY_PREFIX, StoreMessenger,
    StoreMessengerOptions,
};
