//! Append-only quarantine log (journal), one JSON record per line.

use crate::core::error::{Error, Result};
use crate::utils::fs::write_atomic;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// One quarantined file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    /// File name inside the quarantine directory
    pub file: String,
    /// Absolute path the file was taken from
    pub original: String,
    /// Threat label at the time of quarantine
    pub threat: String,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

impl QuarantineEntry {
    pub fn new(
        file: impl Into<String>,
        original: impl Into<String>,
        threat: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            original: original.into(),
            threat: threat.into(),
            timestamp: now_seconds(),
        }
    }
}

pub(crate) fn now_seconds() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

/// Entries read back from disk.
#[derive(Debug, Default)]
pub struct LogContents {
    pub entries: Vec<QuarantineEntry>,
    /// Lines that could not be parsed (torn writes)
    pub discarded: usize,
}

#[derive(Debug)]
pub struct QuarantineLog {
    path: PathBuf,
}

impl QuarantineLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every parsable entry. A missing log is empty.
    pub fn read(&self) -> Result<LogContents> {
        let text = match fs::read(&self.path) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LogContents::default()),
            Err(e) => return Err(Error::file_read(&self.path, e)),
        };

        let mut contents = LogContents::default();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<QuarantineEntry>(line) {
                Ok(entry) => contents.entries.push(entry),
                Err(e) => {
                    log::warn!(
                        "Discarding unreadable quarantine log line {}: {}",
                        idx + 1,
                        e
                    );
                    contents.discarded += 1;
                }
            }
        }
        Ok(contents)
    }

    /// Append one entry and flush it to disk.
    pub fn append(&self, entry: &QuarantineEntry) -> Result<()> {
        let io_err = |e: std::io::Error| Error::file_write(&self.path, e);

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;

        // A torn previous write must not swallow this record.
        let len = file.metadata().map_err(io_err)?.len();
        let mut line = String::new();
        if len > 0 {
            let mut last = [0u8; 1];
            file.seek(SeekFrom::End(-1)).map_err(io_err)?;
            file.read_exact(&mut last).map_err(io_err)?;
            if last[0] != b'\n' {
                line.push('\n');
            }
        }

        line.push_str(&serde_json::to_string(entry)?);
        line.push('\n');
        file.write_all(line.as_bytes()).map_err(io_err)?;
        file.sync_data().map_err(io_err)
    }

    /// Replace the whole log.
    pub fn rewrite(&self, entries: &[QuarantineEntry]) -> Result<()> {
        let mut out = String::new();
        for entry in entries {
            out.push_str(&serde_json::to_string(entry)?);
            out.push('\n');
        }
        write_atomic(&self.path, out.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(name: &str) -> QuarantineEntry {
        QuarantineEntry::new(name, format!("/home/u/{}", name), "Test")
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let log = QuarantineLog::new(dir.path().join("quarantine.log"));
        assert!(log.read().unwrap().entries.is_empty());

        log.append(&entry("a.locked")).unwrap();
        log.append(&entry("b.locked")).unwrap();

        let contents = log.read().unwrap();
        assert_eq!(contents.entries.len(), 2);
        assert_eq!(contents.entries[1].file, "b.locked");
        assert_eq!(contents.discarded, 0);
    }

    #[test]
    fn test_torn_trailing_line_discarded() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quarantine.log");
        let log = QuarantineLog::new(&path);
        log.append(&entry("a.locked")).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(br#"{"file":"b.locked","orig"#).unwrap();
        drop(file);

        let contents = log.read().unwrap();
        assert_eq!(contents.entries.len(), 1);
        assert_eq!(contents.discarded, 1);

        // The next append starts on its own line
        log.append(&entry("c.locked")).unwrap();
        let contents = log.read().unwrap();
        let names: Vec<_> = contents.entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(names, vec!["a.locked", "c.locked"]);
        assert_eq!(contents.discarded, 1);
    }

    #[test]
    fn test_rewrite() {
        let dir = tempdir().unwrap();
        let log = QuarantineLog::new(dir.path().join("quarantine.log"));
        log.append(&entry("a.locked")).unwrap();
        log.append(&entry("b.locked")).unwrap();

        log.rewrite(&[entry("b.locked")]).unwrap();
        let contents = log.read().unwrap();
        assert_eq!(contents.entries.len(), 1);
        assert_eq!(contents.entries[0].file, "b.locked");

        log.rewrite(&[]).unwrap();
        assert!(log.read().unwrap().entries.is_empty());
    }
}
