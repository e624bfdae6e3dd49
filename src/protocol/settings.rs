//! Opaque client settings, stored as one JSON object.

use crate::core::error::Result;
use crate::utils::fs::write_atomic;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored settings. Missing or corrupt files read as `{}`.
    pub fn load(&self) -> Map<String, Value> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn read(&self) -> Map<String, Value> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return Map::new(),
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                log::warn!("Ignoring unreadable settings file {:?}", self.path);
                Map::new()
            }
        }
    }

    /// Shallow-merge `patch` into the stored object and persist it.
    pub fn merge(&self, patch: Map<String, Value>) -> Result<Map<String, Value>> {
        let _guard = self.lock.lock();
        let mut current = self.read();
        current.extend(patch);
        let json = serde_json::to_vec_pretty(&current)?;
        write_atomic(&self.path, &json)?;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_shallow_merge() {
        let dir = tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        assert!(store.load().is_empty());

        store
            .merge(object(json!({"theme": "dark", "sound": {"volume": 3}})))
            .unwrap();
        let merged = store
            .merge(object(json!({"sound": {"muted": true}, "apiKey": ""})))
            .unwrap();

        assert_eq!(merged["theme"], "dark");
        assert_eq!(merged["sound"], json!({"muted": true}));
        assert_eq!(store.load(), merged);
    }

    #[test]
    fn test_corrupt_file_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = SettingsStore::new(&path);
        assert!(store.load().is_empty());

        std::fs::write(&path, "[1, 2]").unwrap();
        assert!(store.load().is_empty());
    }
}
