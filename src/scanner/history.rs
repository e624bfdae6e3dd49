//! Persisted scan history, newest first.

use crate::core::error::Result;
use crate::core::types::ScanHistoryEntry;
use crate::utils::fs::write_atomic;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// JSON array of past runs, capped at `limit` entries.
#[derive(Debug)]
pub struct HistoryStore {
    path: PathBuf,
    limit: usize,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored entries. A missing or corrupt file reads as empty.
    pub fn load(&self) -> Vec<ScanHistoryEntry> {
        let _guard = self.lock.lock();
        self.read()
    }

    fn read(&self) -> Vec<ScanHistoryEntry> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                log::warn!("Cannot read history {:?}: {}", self.path, e);
                return Vec::new();
            }
        };

        match serde_json::from_str::<Vec<ScanHistoryEntry>>(&contents) {
            Ok(mut entries) => {
                entries.truncate(self.limit);
                entries
            }
            Err(e) => {
                log::warn!("Discarding corrupt history {:?}: {}", self.path, e);
                Vec::new()
            }
        }
    }

    /// Insert `entry` at the front and persist. Returns the stored list.
    pub fn append(&self, entry: ScanHistoryEntry) -> Result<Vec<ScanHistoryEntry>> {
        let _guard = self.lock.lock();
        let mut entries = self.read();
        entries.insert(0, entry);
        entries.truncate(self.limit);

        let json = serde_json::to_vec_pretty(&entries)?;
        write_atomic(&self.path, &json)?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunOutcome;
    use chrono::Utc;
    use tempfile::tempdir;

    fn entry(n: u64) -> ScanHistoryEntry {
        ScanHistoryEntry {
            id: n.to_string(),
            timestamp: Utc::now(),
            path: format!("/scan/{}", n),
            files_scanned: n,
            threats_detected: 0,
            duration_ms: 1,
            status: RunOutcome::Completed,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"), 50);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_capped_newest_first() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history.json"), 50);
        for n in 0..60 {
            store.append(entry(n)).unwrap();
        }

        let entries = store.load();
        assert_eq!(entries.len(), 50);
        assert_eq!(entries[0].id, "59");
        assert_eq!(entries[49].id, "10");
    }

    #[test]
    fn test_corrupt_file_recovers() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "[{\"id\": \"1\", \"time").unwrap();

        let store = HistoryStore::new(&path, 50);
        assert!(store.load().is_empty());
        let entries = store.append(entry(7)).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(store.load()[0].id, "7");
    }
}
