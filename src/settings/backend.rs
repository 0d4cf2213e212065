// Persistence backends for the settings blob
use anyhow::{Context, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

use crate::db::connection::DatabaseConnection;
use crate::db::operations::DbOperations;

/// Where a settings blob lives between runs
pub trait SettingsBackend: Send + Sync {
    fn name(&self) -> &str;

    fn load(&self, key: &str) -> Result<Option<Value>>;

    fn store(&self, key: &str, value: &Value) -> Result<()>;
}

/// Primary store: one row per extension id in the SQLite settings table
pub struct SqliteBackend {
    db: DatabaseConnection,
}

impl SqliteBackend {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

impl SettingsBackend for SqliteBackend {
    fn name(&self) -> &str {
        "sqlite"
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        match DbOperations::get_settings_blob(&self.db, key)? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to parse stored settings for {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn store(&self, key: &str, value: &Value) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        DbOperations::put_settings_blob(&self.db, key, &raw)
    }
}

/// Fallback store: a pretty-printed JSON file per extension id
pub struct JsonFileBackend {
    dir: PathBuf,
}

impl JsonFileBackend {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    /// Get the settings file path
    pub fn settings_path(&self, key: &str) -> PathBuf {
        if key.is_empty() {
            self.dir.join("settings.json")
        } else {
            self.dir.join(format!("{}.settings.json", key))
        }
    }
}

impl SettingsBackend for JsonFileBackend {
    fn name(&self) -> &str {
        "json-file"
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        let path = self.settings_path(key);

        if !path.exists() {
            debug!("no settings file at {:?}", path);
            return Ok(None);
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings file {:?}", path))?;
        let value = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file {:?}", path))?;

        debug!("loaded settings from {:?}", path);
        Ok(Some(value))
    }

    fn store(&self, key: &str, value: &Value) -> Result<()> {
        // Ensure directory exists
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create settings directory {:?}", self.dir))?;

        let path = self.settings_path(key);
        let content = serde_json::to_string_pretty(value)?;
        fs::write(&path, content)
            .with_context(|| format!("Failed to write settings file {:?}", path))?;

        debug!("saved settings to {:?}", path);
        Ok(())
    }
}

/// Process-local store, for hosts that persist on their own and for tests
#[derive(Default)]
pub struct MemoryBackend {
    blobs: Mutex<HashMap<String, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blob(key: &str, value: Value) -> Self {
        let backend = Self::default();
        backend.blobs.lock().insert(key.to_string(), value);
        backend
    }

    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.blobs.lock().get(key).cloned()
    }
}

impl SettingsBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    fn store(&self, key: &str, value: &Value) -> Result<()> {
        self.blobs.lock().insert(key.to_string(), value.clone());
        Ok(())
    }
}

impl<T: SettingsBackend + ?Sized> SettingsBackend for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn load(&self, key: &str) -> Result<Option<Value>> {
        (**self).load(key)
    }

    fn store(&self, key: &str, value: &Value) -> Result<()> {
        (**self).store(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sqlite_backend_round_trip() {
        let backend = SqliteBackend::new(DatabaseConnection::in_memory().unwrap());
        assert!(backend.load("mediadeck").unwrap().is_none());

        backend.store("mediadeck", &json!({"enabled": false})).unwrap();
        assert_eq!(
            backend.load("mediadeck").unwrap(),
            Some(json!({"enabled": false}))
        );
    }

    #[test]
    fn test_json_backend_writes_into_directory() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested"));
        backend.store("mediadeck", &json!({"enabled": true})).unwrap();

        assert!(backend.settings_path("mediadeck").exists());
        assert_eq!(
            backend.load("mediadeck").unwrap(),
            Some(json!({"enabled": true}))
        );
    }

    #[test]
    fn test_json_backend_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().to_path_buf());
        fs::write(backend.settings_path("mediadeck"), "{not json").unwrap();
        assert!(backend.load("mediadeck").is_err());
    }
}
