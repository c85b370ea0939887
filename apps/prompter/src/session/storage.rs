//! Small key/value persistence for the session token and saved settings.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::BaseDirs;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::state::{Settings, SettingsPatch};

/// Storage key holding the remote's last applied settings.
pub const SETTINGS_KEY: &str = "teleprompter_settings";

const STORAGE_FILE: &str = "storage.json";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("local storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io error: {0}")]
    Io(#[from] io::Error),
    #[error("malformed storage file: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub trait LocalStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// A JSON object of string entries kept in a single file.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// `~/.prompter`, when a home directory can be determined.
    pub fn default_dir() -> Option<PathBuf> {
        BaseDirs::new().map(|base| base.home_dir().join(".prompter"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, String>, StorageError> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let serialized = serde_json::to_string_pretty(entries)?;
        fs::write(&self.path, serialized)?;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.lock();
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.lock();
        let mut entries = match self.load() {
            Ok(entries) => entries,
            Err(StorageError::Malformed(err)) => {
                warn!(
                    target = "prompter::storage",
                    path = %self.path.display(),
                    error = %err,
                    "discarding malformed storage file"
                );
                BTreeMap::new()
            }
            Err(err) => return Err(err),
        };
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }
}

/// File-backed storage under `dir` (or the default directory), falling back
/// to process memory when no usable directory exists.
pub fn open_storage(dir: Option<PathBuf>) -> Arc<dyn LocalStorage> {
    let Some(dir) = dir.or_else(FileStorage::default_dir) else {
        debug!(target = "prompter::storage", "no home directory; storage is in-memory");
        return Arc::new(MemoryStorage::default());
    };
    if let Err(err) = fs::create_dir_all(&dir) {
        debug!(
            target = "prompter::storage",
            dir = %dir.display(),
            error = %err,
            "storage directory unavailable; storage is in-memory"
        );
        return Arc::new(MemoryStorage::default());
    }
    Arc::new(FileStorage::new(dir.join(STORAGE_FILE)))
}

/// Saved settings overlaid on the defaults; `None` when nothing usable was saved.
pub fn load_settings(storage: &dyn LocalStorage) -> Option<Settings> {
    let raw = match storage.get(SETTINGS_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(err) => {
            debug!(target = "prompter::storage", error = %err, "saved settings unreadable");
            return None;
        }
    };
    match serde_json::from_str::<serde_json::Value>(&raw) {
        Ok(value) => {
            let mut settings = Settings::default();
            settings.merge(&SettingsPatch::from_value(&value));
            Some(settings)
        }
        Err(err) => {
            debug!(target = "prompter::storage", error = %err, "saved settings malformed");
            None
        }
    }
}

pub fn save_settings(storage: &dyn LocalStorage, settings: &Settings) {
    let result = serde_json::to_string(settings)
        .map_err(StorageError::from)
        .and_then(|raw| storage.set(SETTINGS_KEY, &raw));
    if let Err(err) = result {
        debug!(target = "prompter::storage", error = %err, "settings not persisted");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_storage_round_trips_entries() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("nested").join(STORAGE_FILE));
        assert_eq!(storage.get("missing").unwrap(), None);
        storage.set("a", "1").unwrap();
        storage.set("b", "2").unwrap();
        let reopened = FileStorage::new(storage.path());
        assert_eq!(reopened.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(reopened.get("b").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn malformed_file_is_replaced_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(STORAGE_FILE);
        fs::write(&path, "{not json").unwrap();
        let storage = FileStorage::new(&path);
        assert!(matches!(storage.get("a"), Err(StorageError::Malformed(_))));
        storage.set("a", "1").unwrap();
        assert_eq!(storage.get("a").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn settings_round_trip_and_fill_defaults() {
        let storage = MemoryStorage::default();
        assert_eq!(load_settings(&storage), None);

        storage.set(SETTINGS_KEY, r#"{"fontSize":64}"#).unwrap();
        let loaded = load_settings(&storage).expect("saved settings");
        assert_eq!(loaded.font_size, 64);
        assert_eq!(loaded.text_color, Settings::default().text_color);

        let mut custom = Settings::default();
        custom.background_color = "#101010".into();
        save_settings(&storage, &custom);
        assert_eq!(load_settings(&storage), Some(custom));
    }

    #[test]
    fn malformed_settings_are_ignored() {
        let storage = MemoryStorage::default();
        storage.set(SETTINGS_KEY, "not-json").unwrap();
        assert_eq!(load_settings(&storage), None);
    }

    #[test]
    fn open_storage_uses_requested_dir() {
        let dir = tempfile::tempdir().unwrap();
        let storage = open_storage(Some(dir.path().to_path_buf()));
        storage.set("k", "v").unwrap();
        assert!(dir.path().join(STORAGE_FILE).exists());
    }
}
