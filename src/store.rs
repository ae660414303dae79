use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Mutex;

use log::{debug, warn};

use crate::error::PersistenceError;

/// Device name to activation count.
pub type ActivationCounts = BTreeMap<String, u64>;

/// Bump when the layout of the counter record changes. Records written
/// under another version are never read.
pub const COUNTS_RECORD_VERSION: u32 = 2;

/// Scoped key-value storage with get/set semantics.
pub trait KeyValueStore: Send {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError>;
    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError>;
}

impl<S: KeyValueStore + Sync> KeyValueStore for std::sync::Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        (**self).set(key, value)
    }
}

/// A JSON object of key -> value on disk. Writes go through a temp file and
/// a rename so a crash mid-write leaves the previous contents intact.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    fn read_all(&self) -> Result<HashMap<String, String>, PersistenceError> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(serde_json::from_str(&contents)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(err) => Err(err.into()),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        // Only a corrupt file is replaced. I/O errors leave it untouched.
        let mut entries = match self.read_all() {
            Ok(entries) => entries,
            Err(PersistenceError::Encoding(err)) => {
                warn!("Discarding unreadable store {}: {}", self.path.display(), err);
                HashMap::new()
            }
            Err(err) => return Err(err),
        };
        entries.insert(key.to_string(), value.to_string());

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, PersistenceError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), PersistenceError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| PersistenceError::Unavailable("memory store lock poisoned".into()))?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Durable load/save of the activation counter map.
///
/// Neither direction ever fails the caller: unreadable state loads as an
/// empty map and failed writes are logged. The in-memory counters stay
/// authoritative for the running session.
pub struct CounterPersistence<K> {
    store: K,
    key: String,
}

impl<K: KeyValueStore> CounterPersistence<K> {
    pub fn new(store: K, scope: &str) -> Self {
        CounterPersistence {
            store,
            key: counts_key(scope),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn load(&self) -> ActivationCounts {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No stored counters under {}", self.key);
                return ActivationCounts::new();
            }
            Err(err) => {
                warn!("Failed to read stored counters: {}", err);
                return ActivationCounts::new();
            }
        };

        match serde_json::from_str(&raw) {
            Ok(counts) => counts,
            Err(err) => {
                warn!("Stored counters under {} are corrupt, starting empty: {}", self.key, err);
                ActivationCounts::new()
            }
        }
    }

    pub fn save(&self, counts: &ActivationCounts) {
        let result = serde_json::to_string(counts)
            .map_err(PersistenceError::from)
            .and_then(|encoded| self.store.set(&self.key, &encoded));

        if let Err(err) = result {
            warn!("Failed to persist counters: {}", err);
        }
    }
}

fn counts_key(scope: &str) -> String {
    format!("{}/activation_counts_v{}", scope, COUNTS_RECORD_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, PersistenceError> {
            Err(PersistenceError::Unavailable("offline".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), PersistenceError> {
            Err(PersistenceError::Unavailable("quota exceeded".into()))
        }
    }

    fn counts(entries: &[(&str, u64)]) -> ActivationCounts {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_load_missing_is_empty() {
        let persistence = CounterPersistence::new(MemoryStore::new(), "default");
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn test_save_then_load() {
        let store = Arc::new(MemoryStore::new());
        let persistence = CounterPersistence::new(Arc::clone(&store), "default");
        persistence.save(&counts(&[("dev1", 3), ("dev2", 0)]));

        assert_eq!(
            store.get("default/activation_counts_v2").unwrap().as_deref(),
            Some(r#"{"dev1":3,"dev2":0}"#)
        );
        assert_eq!(persistence.load(), counts(&[("dev1", 3), ("dev2", 0)]));
    }

    #[test]
    fn test_corrupt_record_loads_empty() {
        let store = Arc::new(MemoryStore::new());
        let persistence = CounterPersistence::new(Arc::clone(&store), "default");

        store.set(persistence.key(), "{not json").unwrap();
        assert!(persistence.load().is_empty());

        store.set(persistence.key(), r#"{"dev1":-4}"#).unwrap();
        assert!(persistence.load().is_empty());

        store.set(persistence.key(), "[1,2,3]").unwrap();
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn test_other_version_is_ignored() {
        let store = Arc::new(MemoryStore::new());
        store.set("default/activation_counts_v1", r#"{"dev1":9}"#).unwrap();
        let persistence = CounterPersistence::new(Arc::clone(&store), "default");
        assert!(persistence.load().is_empty());
    }

    #[test]
    fn test_scopes_are_isolated() {
        let store = Arc::new(MemoryStore::new());
        CounterPersistence::new(Arc::clone(&store), "alice").save(&counts(&[("dev1", 1)]));
        assert!(CounterPersistence::new(Arc::clone(&store), "bob").load().is_empty());
    }

    #[test]
    fn test_store_failures_are_swallowed() {
        let persistence = CounterPersistence::new(FailingStore, "default");
        assert!(persistence.load().is_empty());
        persistence.save(&counts(&[("dev1", 1)]));
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let store = FileStore::new(&path);
        assert_eq!(store.get("a").unwrap(), None);
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_file_store_recovers_from_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "garbage").unwrap();

        let persistence = CounterPersistence::new(FileStore::new(&path), "default");
        assert!(persistence.load().is_empty());

        persistence.save(&counts(&[("dev1", 2)]));
        assert_eq!(persistence.load(), counts(&[("dev1", 2)]));
    }

    #[test]
    fn test_file_store_keeps_contents_on_read_error() {
        let dir = tempfile::tempdir().unwrap();
        // a directory where the file should be cannot be read as one
        let path = dir.path().join("state.json");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("alice"), "counters").unwrap();

        let store = FileStore::new(&path);
        assert!(matches!(store.set("a", "1"), Err(PersistenceError::Io(_))));
        assert!(!dir.path().join("state.tmp").exists());
        assert_eq!(std::fs::read_to_string(path.join("alice")).unwrap(), "counters");

        CounterPersistence::new(store, "bob").save(&counts(&[("dev1", 1)]));
        assert!(path.is_dir());
        assert!(!dir.path().join("state.tmp").exists());
    }
}
