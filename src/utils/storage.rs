//! Checkpoint and subscriber persistence (JSON file backend + registry)

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Notification recipient (a Telegram chat id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecipientId(pub i64);

impl fmt::Display for RecipientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Highest block height fully processed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    #[serde(alias = "block")]
    pub height: u64,
    #[serde(alias = "timestamp", with = "chrono::serde::ts_milliseconds")]
    pub written_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn now(height: u64) -> Self {
        Self {
            height,
            written_at: Utc::now(),
        }
    }
}

/// Single-writer durable checkpoint
pub trait CheckpointStore: Send + Sync {
    fn load(&self) -> StorageResult<Option<Checkpoint>>;
    fn save(&self, height: u64) -> StorageResult<Checkpoint>;
}

/// Full-overwrite durable subscriber set
pub trait SubscriberStore: Send + Sync {
    fn load(&self) -> StorageResult<BTreeSet<RecipientId>>;
    fn save(&self, subscribers: &BTreeSet<RecipientId>) -> StorageResult<()>;
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> StorageResult<Option<T>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StorageError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&data).map(Some).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// Write to a sibling temp file then rename over the target
fn write_json<T: Serialize>(path: &Path, value: &T) -> StorageResult<()> {
    let io_err = |source| StorageError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
    }

    let json = serde_json::to_string_pretty(value).map_err(|source| StorageError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, json).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;
    Ok(())
}

/// `{"height": 123, "writtenAt": 1700000000000}`
pub struct JsonCheckpointStore {
    path: PathBuf,
}

impl JsonCheckpointStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl CheckpointStore for JsonCheckpointStore {
    fn load(&self) -> StorageResult<Option<Checkpoint>> {
        read_json(&self.path)
    }

    fn save(&self, height: u64) -> StorageResult<Checkpoint> {
        let checkpoint = Checkpoint::now(height);
        write_json(&self.path, &checkpoint)?;
        Ok(checkpoint)
    }
}

/// Flat JSON array of chat ids
pub struct JsonSubscriberStore {
    path: PathBuf,
}

impl JsonSubscriberStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SubscriberStore for JsonSubscriberStore {
    fn load(&self) -> StorageResult<BTreeSet<RecipientId>> {
        Ok(read_json::<Vec<RecipientId>>(&self.path)?
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    fn save(&self, subscribers: &BTreeSet<RecipientId>) -> StorageResult<()> {
        let list: Vec<RecipientId> = subscribers.iter().copied().collect();
        write_json(&self.path, &list)
    }
}

/// In-memory subscriber set that persists every change before returning
pub struct SubscriberRegistry {
    members: Mutex<BTreeSet<RecipientId>>,
    store: Arc<dyn SubscriberStore>,
}

impl SubscriberRegistry {
    /// Load from `store`; an unreadable store starts empty
    pub fn load(store: Arc<dyn SubscriberStore>) -> Self {
        let members = match store.load() {
            Ok(members) => members,
            Err(e) => {
                error!(target: "STORAGE", "Failed to load subscribers, starting empty: {}", e);
                BTreeSet::new()
            }
        };
        info!(target: "STORAGE", "Loaded {} subscribers", members.len());

        Self {
            members: Mutex::new(members),
            store,
        }
    }

    /// Returns `true` if `id` was not already subscribed
    pub fn subscribe(&self, id: RecipientId) -> bool {
        let mut members = self.members.lock();
        let added = members.insert(id);
        if added {
            self.persist(&members);
            info!(target: "STORAGE", "+ Subscriber: {}", id);
        }
        added
    }

    /// Returns `true` if `id` was subscribed
    pub fn unsubscribe(&self, id: RecipientId) -> bool {
        let mut members = self.members.lock();
        let removed = members.remove(&id);
        if removed {
            self.persist(&members);
            info!(target: "STORAGE", "- Subscriber: {}", id);
        }
        removed
    }

    /// Drop a recipient the notifier reported as permanently unreachable
    pub fn remove_unreachable(&self, id: RecipientId, reason: &str) -> bool {
        let mut members = self.members.lock();
        let removed = members.remove(&id);
        if removed {
            self.persist(&members);
            info!(target: "STORAGE", "- Subscriber {} removed: {}", id, reason);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.members.lock().len()
    }

    pub fn snapshot(&self) -> Vec<RecipientId> {
        self.members.lock().iter().copied().collect()
    }

    /// Persist the current set (used on shutdown)
    pub fn flush(&self) -> StorageResult<()> {
        let members = self.members.lock();
        self.store.save(&members)
    }

    fn persist(&self, members: &BTreeSet<RecipientId>) {
        if let Err(e) = self.store.save(members) {
            error!(target: "STORAGE", "Failed to save subscribers (kept in memory): {}", e);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    pub(crate) fn temp_path(name: &str) -> PathBuf {
        let id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "whale_alert_test_{}_{}",
            std::process::id(),
            id
        ));
        let _ = fs::remove_dir_all(&dir);
        dir.join(name)
    }

    /// Store whose saves can be made to fail
    #[derive(Default)]
    pub(crate) struct MemorySubscriberStore {
        pub saved: Mutex<Option<BTreeSet<RecipientId>>>,
        pub saves: AtomicU64,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl SubscriberStore for MemorySubscriberStore {
        fn load(&self) -> StorageResult<BTreeSet<RecipientId>> {
            Ok(self.saved.lock().clone().unwrap_or_default())
        }

        fn save(&self, subscribers: &BTreeSet<RecipientId>) -> StorageResult<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io {
                    path: PathBuf::from("memory"),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            *self.saved.lock() = Some(subscribers.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct MemoryCheckpointStore {
        pub saved: Mutex<Option<Checkpoint>>,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl MemoryCheckpointStore {
        pub(crate) fn at(height: u64) -> Self {
            let store = Self::default();
            *store.saved.lock() = Some(Checkpoint::now(height));
            store
        }

        pub(crate) fn height(&self) -> Option<u64> {
            self.saved.lock().map(|c| c.height)
        }
    }

    impl CheckpointStore for MemoryCheckpointStore {
        fn load(&self) -> StorageResult<Option<Checkpoint>> {
            Ok(*self.saved.lock())
        }

        fn save(&self, height: u64) -> StorageResult<Checkpoint> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(StorageError::Io {
                    path: PathBuf::from("memory"),
                    source: io::Error::new(io::ErrorKind::Other, "disk full"),
                });
            }
            let checkpoint = Checkpoint::now(height);
            *self.saved.lock() = Some(checkpoint);
            Ok(checkpoint)
        }
    }

    #[test]
    fn checkpoint_missing_file_is_absent() {
        let store = JsonCheckpointStore::new(temp_path("lastblock.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn checkpoint_survives_reopen() {
        let path = temp_path("lastblock.json");
        let saved = JsonCheckpointStore::new(&path).save(1005).unwrap();

        let reopened = JsonCheckpointStore::new(&path).load().unwrap().unwrap();
        assert_eq!(reopened.height, 1005);
        assert_eq!(
            reopened.written_at.timestamp_millis(),
            saved.written_at.timestamp_millis()
        );
    }

    #[test]
    fn checkpoint_file_format() {
        let path = temp_path("lastblock.json");
        JsonCheckpointStore::new(&path).save(42).unwrap();

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["height"], 42);
        assert!(raw["writtenAt"].is_i64());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn checkpoint_reads_legacy_keys() {
        let path = temp_path("lastblock.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, r#"{"block": 61234567, "timestamp": 1700000000000}"#).unwrap();

        let checkpoint = JsonCheckpointStore::new(&path).load().unwrap().unwrap();
        assert_eq!(checkpoint.height, 61234567);
        assert_eq!(checkpoint.written_at.timestamp_millis(), 1700000000000);
    }

    #[test]
    fn corrupt_checkpoint_is_an_error() {
        let path = temp_path("lastblock.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(
            JsonCheckpointStore::new(&path).load(),
            Err(StorageError::Json { .. })
        ));
    }

    #[test]
    fn subscribers_are_a_flat_list() {
        let path = temp_path("subscribers.json");
        let store = JsonSubscriberStore::new(&path);
        let set: BTreeSet<_> = [RecipientId(-1001), RecipientId(42)].into_iter().collect();
        store.save(&set).unwrap();

        let raw: Vec<i64> = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw, vec![-1001, 42]);
        assert_eq!(store.load().unwrap(), set);
    }

    #[test]
    fn subscriber_list_with_duplicates_loads_as_a_set() {
        let path = temp_path("subscribers.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "[7, 7, 3]").unwrap();

        let loaded = JsonSubscriberStore::new(&path).load().unwrap();
        assert_eq!(loaded.into_iter().collect::<Vec<_>>(), vec![RecipientId(3), RecipientId(7)]);
    }

    #[test]
    fn registry_persists_each_mutation() {
        let store = Arc::new(MemorySubscriberStore::default());
        let registry = SubscriberRegistry::load(store.clone());

        assert!(registry.subscribe(RecipientId(1)));
        assert!(!registry.subscribe(RecipientId(1)));
        assert!(registry.subscribe(RecipientId(2)));
        assert_eq!(store.saves.load(Ordering::SeqCst), 2);

        assert!(registry.unsubscribe(RecipientId(1)));
        assert!(!registry.unsubscribe(RecipientId(1)));
        assert_eq!(store.saves.load(Ordering::SeqCst), 3);

        let saved = store.saved.lock().clone().unwrap();
        assert_eq!(saved.into_iter().collect::<Vec<_>>(), vec![RecipientId(2)]);
    }

    #[test]
    fn registry_keeps_memory_state_when_save_fails() {
        let store = Arc::new(MemorySubscriberStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let registry = SubscriberRegistry::load(store.clone());

        assert!(registry.subscribe(RecipientId(9)));
        assert!(registry.snapshot().contains(&RecipientId(9)));
        assert!(registry.flush().is_err());

        store.fail.store(false, Ordering::SeqCst);
        registry.flush().unwrap();
        assert!(store.saved.lock().as_ref().unwrap().contains(&RecipientId(9)));
    }

    #[test]
    fn registry_reloads_from_json() {
        let path = temp_path("subscribers.json");
        {
            let registry = SubscriberRegistry::load(Arc::new(JsonSubscriberStore::new(&path)));
            registry.subscribe(RecipientId(5));
            registry.subscribe(RecipientId(6));
            registry.remove_unreachable(RecipientId(5), "bot blocked");
        }

        let registry = SubscriberRegistry::load(Arc::new(JsonSubscriberStore::new(&path)));
        assert_eq!(registry.snapshot(), vec![RecipientId(6)]);
    }
}
