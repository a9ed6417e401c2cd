//! Key-value stores backing the storage transport.
//!
//! A store is the storage-area seam: subscribing to a store instance scopes
//! change notifications to that area, so unrelated writers never
//! cross-trigger a messenger. Stores deliver change events to every
//! subscriber, the writer's own context included; suppressing a sender's
//! own messages is the transport's job, via the sender id embedded in keys.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use crate::error::{StoreError, StoreResult};

/// Buffered change notifications per store before slow subscribers lag.
const CHANGE_CAPACITY: usize = 256;

/// A change observed in a store.
#[derive(Debug, Clone)]
pub struct StoreChange {
    /// Key that changed.
    pub key: String,
    /// Value now present under the key; `None` for removals.
    pub new_value: Option<String>,
}

/// Shared persistent map with a change feed.
pub trait KeyValueStore: Send + Sync {
    /// Write `value` under `key`, overwriting any previous value.
    ///
    /// # Errors
    ///
    /// Fails when the backing storage rejects the write.
    fn put(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Read the value under `key`.
    ///
    /// # Errors
    ///
    /// Fails when the backing storage cannot be read.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Remove `key`; removing an absent key is not an error.
    ///
    /// # Errors
    ///
    /// Fails when the backing storage rejects the removal.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Every key starting with `prefix`, in no particular order.
    ///
    /// # Errors
    ///
    /// Fails when the backing storage cannot be enumerated.
    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Subscribe to this store's change feed.
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;
}

/// In-process store; share one instance across contexts via `Arc`.
///
/// The explicit replacement for an ambient default storage singleton:
/// callers construct and pass the store themselves.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
    changes: broadcast::Sender<StoreChange>,
}

impl MemoryStore {
    /// Fresh, empty store.
    #[must_use]
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyValueStore for MemoryStore {
    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        self.lock().insert(key.to_owned(), value.to_owned());
        let _ = self.changes.send(StoreChange {
            key: key.to_owned(),
            new_value: Some(value.to_owned()),
        });
        Ok(())
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.lock().get(key).cloned())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        if self.lock().remove(key).is_some() {
            let _ = self.changes.send(StoreChange {
                key: key.to_owned(),
                new_value: None,
            });
        }
        Ok(())
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .lock()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}

/// Store persisting one file per key inside a root directory, with change
/// notifications driven by a filesystem watcher. Contexts in separate
/// processes share state by pointing at the same directory.
pub struct DirStore {
    root: PathBuf,
    changes: broadcast::Sender<StoreChange>,
    _watcher: RecommendedWatcher,
}

impl DirStore {
    /// Open a store rooted at `root`, creating the directory if needed.
    ///
    /// # Errors
    ///
    /// Fails when the directory cannot be created or watched.
    pub fn new(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|source| StoreError::io("create_root", &root, source))?;

        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        let feed = changes.clone();
        let mut watcher = notify::recommended_watcher(move |observed: notify::Result<Event>| {
            let Ok(event) = observed else { return };
            if !matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
            ) {
                return;
            }
            for path in event.paths {
                let Some(key) = key_for(&path) else { continue };
                let new_value = fs::read_to_string(&path).ok();
                let _ = feed.send(StoreChange { key, new_value });
            }
        })
        .map_err(|source| StoreError::watch("create_watcher", &root, source))?;
        watcher
            .watch(&root, RecursiveMode::NonRecursive)
            .map_err(|source| StoreError::watch("watch_root", &root, source))?;

        Ok(Self {
            root,
            changes,
            _watcher: watcher,
        })
    }

    /// Directory the store persists into.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn key_for(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
}

impl KeyValueStore for DirStore {
    fn put(&self, key: &str, value: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        fs::write(&path, value).map_err(|source| StoreError::io("put", path, source))
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::io("get", path, source)),
        }
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(source) if source.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::io("remove", path, source)),
        }
    }

    fn keys(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let entries =
            fs::read_dir(&self.root).map_err(|source| StoreError::io("keys", &self.root, source))?;
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::io("keys", &self.root, source))?;
            if let Some(name) = entry.file_name().to_str() {
                if name.starts_with(prefix) {
                    keys.push(name.to_owned());
                }
            }
        }
        Ok(keys)
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }
}
