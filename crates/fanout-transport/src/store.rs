//! Store-backed fallback transport with TTL-based garbage collection.
//!
//! Each send persists a JSON envelope under a key unique to this messenger
//! (channel prefix, sender id, incrementing counter), so concurrent senders
//! never overwrite each other. Receivers watch the store's change feed and
//! dispatch matching entries. Two timers reclaim space: every sent entry is
//! deleted `cleanup_interval` after it was written, and an independent
//! periodic sweep removes any entry older than `ttl`, which catches entries
//! orphaned by crashed or closed contexts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;
use uuid::Uuid;

use crate::error::{TransportError, TransportResult};
use crate::kv::KeyValueStore;
use crate::messenger::{MessageHandler, Messenger};

/// Age after which a persisted message is stale and eligible for sweep
/// removal.
pub const DEFAULT_TTL: Duration = Duration::from_millis(1_000);

/// Sweep period, and the delay before a sender deletes its own entry.
///
/// Deletion is deferred rather than immediate so that contexts still
/// draining their change feed get to observe the entry before it vanishes;
/// the sweep interacts with [`DEFAULT_TTL`] only for entries whose sender
/// never got to delete them.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_millis(60_000);

/// Prefix shared by every message key this transport writes.
pub const STORE_KEY_PREFIX: &str = "fanout.msg.";

/// Wire envelope persisted for each message. Round-trips exactly through
/// JSON; this is the transport's only self-defined serialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// Opaque payload handed to the receiving handler.
    pub data: Value,
    /// Epoch milliseconds at which the message was written.
    pub timestamp: i64,
}

/// Options for [`StoreMessenger`].
pub struct StoreMessengerOptions {
    /// Channel namespace.
    pub channel_name: String,
    /// Backing store shared with the other contexts.
    pub store: Arc<dyn KeyValueStore>,
    /// See [`DEFAULT_TTL`].
    pub ttl: Duration,
    /// See [`DEFAULT_CLEANUP_INTERVAL`].
    pub cleanup_interval: Duration,
}

impl StoreMessengerOptions {
    /// Options carrying the documented default ttl and cleanup interval.
    #[must_use]
    pub fn new(channel_name: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            channel_name: channel_name.into(),
            store,
            ttl: DEFAULT_TTL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }
}

fn channel_prefix(channel_name: &str) -> String {
    format!("{STORE_KEY_PREFIX}{channel_name}.")
}

fn epoch_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Messenger persisting messages through a [`KeyValueStore`].
pub struct StoreMessenger {
    channel_name: String,
    sender_id: Uuid,
    store: Arc<dyn KeyValueStore>,
    counter: AtomicU64,
    cleanup_interval: Duration,
    handler: Arc<Mutex<Option<MessageHandler>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl StoreMessenger {
    /// Open a messenger over `options.store`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime; the receive and sweep
    /// loops need one.
    #[must_use]
    pub fn new(options: StoreMessengerOptions) -> Self {
        let StoreMessengerOptions {
            channel_name,
            store,
            ttl,
            cleanup_interval,
        } = options;
        let sender_id = Uuid::new_v4();
        let handler: Arc<Mutex<Option<MessageHandler>>> = Arc::new(Mutex::new(None));

        let forward = spawn_forward(&channel_name, sender_id, &store, Arc::clone(&handler));
        let sweep = spawn_sweep(
            channel_prefix(&channel_name),
            Arc::clone(&store),
            ttl,
            cleanup_interval,
        );

        Self {
            channel_name,
            sender_id,
            store,
            counter: AtomicU64::new(0),
            cleanup_interval,
            handler,
            tasks: Mutex::new(vec![forward, sweep]),
            closed: AtomicBool::new(false),
        }
    }
}

fn spawn_forward(
    channel_name: &str,
    sender_id: Uuid,
    store: &Arc<dyn KeyValueStore>,
    handler: Arc<Mutex<Option<MessageHandler>>>,
) -> JoinHandle<()> {
    let prefix = channel_prefix(channel_name);
    let own_prefix = format!("{prefix}{sender_id}.");
    // Subscribe before returning so no early message slips past.
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if !change.key.starts_with(&prefix) || change.key.starts_with(&own_prefix) {
                        continue;
                    }
                    let Some(value) = change.new_value else {
                        continue;
                    };
                    if value.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<MessageEnvelope>(&value) {
                        Ok(envelope) => {
                            let callback = handler
                                .lock()
                                .unwrap_or_else(PoisonError::into_inner)
                                .clone();
                            if let Some(callback) = callback {
                                callback(envelope.data);
                            }
                        }
                        Err(cause) => {
                            warn!(
                                key = %change.key,
                                error = %cause,
                                "dropping malformed message entry"
                            );
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "store messenger fell behind; notifications dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn spawn_sweep(
    prefix: String,
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    cleanup_interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(cleanup_interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; skip it so sweeps run one
        // full interval apart.
        ticks.tick().await;
        loop {
            ticks.tick().await;
            sweep_expired(&prefix, store.as_ref(), ttl);
        }
    })
}

fn sweep_expired(prefix: &str, store: &dyn KeyValueStore, ttl: Duration) {
    let keys = match store.keys(prefix) {
        Ok(keys) => keys,
        Err(cause) => {
            warn!(error = %cause, "sweep could not enumerate message keys");
            return;
        }
    };
    let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
    let now = epoch_ms();
    for key in keys {
        let entry = match store.get(&key) {
            Ok(Some(entry)) => entry,
            Ok(None) => continue,
            Err(cause) => {
                warn!(key = %key, error = %cause, "sweep could not read entry");
                continue;
            }
        };
        let expired = match serde_json::from_str::<MessageEnvelope>(&entry) {
            Ok(envelope) => now.saturating_sub(envelope.timestamp) > ttl_ms,
            Err(cause) => {
                // Unreadable entries would otherwise survive every sweep.
                warn!(key = %key, error = %cause, "removing unreadable message entry");
                true
            }
        };
        if expired {
            if let Err(cause) = store.remove(&key) {
                warn!(key = %key, error = %cause, "sweep could not remove entry");
            }
        }
    }
}

impl Messenger for StoreMessenger {
    fn channel_name(&self) -> &str {
        &self.channel_name
    }

    fn post_message(&self, data: Value) -> TransportResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed {
                channel: self.channel_name.clone(),
            });
        }
        let sequence = self.counter.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{}{}.{}",
            channel_prefix(&self.channel_name),
            self.sender_id,
            sequence
        );
        let envelope = MessageEnvelope {
            data,
            timestamp: epoch_ms(),
        };
        let entry =
            serde_json::to_string(&envelope).map_err(|source| TransportError::Encode { source })?;
        self.store.put(&key, &entry)?;

        // Deferred, not immediate: contexts still draining their change
        // feed must get to observe the entry before it disappears.
        let store = Arc::clone(&self.store);
        let delay = self.cleanup_interval;
        drop(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(cause) = store.remove(&key) {
                warn!(key = %key, error = %cause, "deferred message removal failed");
            }
        }));
        Ok(())
    }

    fn set_message_handler(&self, handler: MessageHandler) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for task in tasks {
            task.abort();
        }
        let _ = self
            .handler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

impl Drop for StoreMessenger {
    fn drop(&mut self) {
        self.close();
    }
}
