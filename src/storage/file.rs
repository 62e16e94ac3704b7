use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::debug;

use super::{DurableStorage, StorageError, StorageEvent, EVENT_CAPACITY};

/// Storage backed by a single JSON object file.
///
/// Every read goes to disk so edits made by another process become visible
/// on the next read. Writes rewrite the whole file through a temporary file
/// and a rename.
pub struct FileStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
    events: broadcast::Sender<StorageEvent>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
            events,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>, StorageError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) if content.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), entries = entries.len(), "Storage file written");
        Ok(())
    }

    fn publish(&self, key: &str, new_value: Option<String>) {
        let _ = self.events.send(StorageEvent {
            key: key.to_string(),
            new_value,
        });
    }
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        {
            let _guard = self.write_lock.lock();
            let mut entries = self.read_all()?;
            entries.insert(key.to_string(), value.to_string());
            self.write_all(&entries)?;
        }
        self.publish(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let removed = {
            let _guard = self.write_lock.lock();
            let mut entries = self.read_all()?;
            let removed = entries.remove(key).is_some();
            if removed {
                self.write_all(&entries)?;
            }
            removed
        };
        if removed {
            self.publish(key, None);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StorageEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("storage.json"));
        assert_eq!(storage.get("user").unwrap(), None);
    }

    #[test]
    fn test_values_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.json");

        FileStorage::new(&path).set("user", r#"{"id":"u1"}"#).unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.get("user").unwrap().as_deref(),
            Some(r#"{"id":"u1"}"#)
        );
    }

    #[test]
    fn test_external_edits_are_visible() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        let storage = FileStorage::new(&path);
        storage.set("a", "1").unwrap();

        std::fs::write(&path, r#"{"a":"2","b":"3"}"#).unwrap();

        assert_eq!(storage.get("a").unwrap().as_deref(), Some("2"));
        assert_eq!(storage.get("b").unwrap().as_deref(), Some("3"));
    }

    #[test]
    fn test_corrupted_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("storage.json");
        std::fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(
            storage.get("user"),
            Err(StorageError::Corrupted(_))
        ));
    }

    #[test]
    fn test_remove_publishes_only_when_present() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path().join("storage.json"));
        let mut rx = storage.subscribe();

        storage.remove("user").unwrap();
        assert!(rx.try_recv().is_err());

        storage.set("user", "x").unwrap();
        storage.remove("user").unwrap();
        assert_eq!(rx.try_recv().unwrap().new_value.as_deref(), Some("x"));
        assert_eq!(rx.try_recv().unwrap().new_value, None);
    }
}
