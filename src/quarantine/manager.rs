//! Quarantine manager.
//!
//! Moves detected files into the quarantine directory and keeps the log in
//! step with what is actually on disk. Every mutating call holds the log
//! lock for its whole duration.

use super::journal::{now_seconds, QuarantineEntry, QuarantineLog};
use super::operations::{move_file, remove_file_if_exists};
use crate::core::config::QuarantineConfig;
use crate::core::error::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Log file name inside the quarantine directory.
pub const LOG_FILE: &str = "quarantine.log";
/// Threat label for operator-initiated quarantine.
pub const MANUAL_THREAT: &str = "Manual Quarantine";
/// Original path recorded for adopted orphans.
pub const UNKNOWN_SOURCE: &str = "Unknown Source";
/// Threat label recorded for adopted orphans.
pub const UNKNOWN_THREAT: &str = "Unknown";

/// Consistency of a listed entry with the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Ok,
    /// In the quarantine directory, origin unknown
    Orphaned,
    /// Logged, but present neither in quarantine nor at its original path
    Lost,
}

/// Entry as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineListing {
    pub file: String,
    pub original: String,
    pub threat: String,
    pub timestamp: f64,
    pub state: EntryState,
}

impl QuarantineListing {
    fn from_entry(entry: QuarantineEntry, state: EntryState) -> Self {
        Self {
            file: entry.file,
            original: entry.original,
            threat: entry.threat,
            timestamp: entry.timestamp,
            state,
        }
    }
}

/// Result of a batch restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub restored: usize,
    pub failed: usize,
}

/// What load-time reconciliation changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Unlogged files adopted into the log
    pub adopted: usize,
    /// Entries whose file never left its original path
    pub dropped_stale: usize,
    /// Duplicate entries for the same quarantined file
    pub dropped_duplicates: usize,
    /// Unparsable log lines
    pub discarded_lines: usize,
    /// Logged files found nowhere
    pub lost: Vec<String>,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.adopted > 0
            || self.dropped_stale > 0
            || self.dropped_duplicates > 0
            || self.discarded_lines > 0
    }
}

pub struct QuarantineManager {
    dir: PathBuf,
    suffix: String,
    log: Mutex<QuarantineLog>,
}

impl QuarantineManager {
    /// Open the quarantine directory and reconcile the log with its contents.
    pub fn open(config: &QuarantineConfig) -> Result<(Self, ReconcileReport)> {
        Self::open_at(config.quarantine_dir(), &config.file_suffix)
    }

    pub fn open_at(dir: impl Into<PathBuf>, suffix: &str) -> Result<(Self, ReconcileReport)> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::DirectoryAccess {
            path: dir.clone(),
            source: e,
        })?;
        // Containment checks compare canonical paths on both sides.
        let dir = fs::canonicalize(&dir).map_err(|e| Error::DirectoryAccess {
            path: dir.clone(),
            source: e,
        })?;

        let manager = Self {
            log: Mutex::new(QuarantineLog::new(dir.join(LOG_FILE))),
            dir,
            suffix: suffix.to_string(),
        };
        let report = manager.reconcile()?;
        Ok((manager, report))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Bring the log in line with the directory.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let log = self.log.lock();
        let contents = log.read()?;
        let on_disk = self.quarantined_files()?;

        let mut report = ReconcileReport {
            discarded_lines: contents.discarded,
            ..Default::default()
        };
        let mut seen = HashSet::new();
        let mut kept = Vec::with_capacity(contents.entries.len());

        for entry in contents.entries {
            if !seen.insert(entry.file.clone()) {
                report.dropped_duplicates += 1;
                continue;
            }
            if on_disk.contains(&entry.file) {
                kept.push(entry);
            } else if self.never_moved(&entry) {
                log::info!(
                    "Dropping stale quarantine entry {}: file is still at {}",
                    entry.file,
                    entry.original
                );
                report.dropped_stale += 1;
            } else {
                log::error!(
                    "Quarantined file {} (from {}) is missing",
                    entry.file,
                    entry.original
                );
                report.lost.push(entry.file.clone());
                kept.push(entry);
            }
        }

        let mut orphans: Vec<&String> = on_disk.iter().filter(|f| !seen.contains(*f)).collect();
        orphans.sort();
        for file in orphans {
            log::warn!("Adopting unlogged quarantine file {}", file);
            kept.push(QuarantineEntry {
                file: file.clone(),
                original: UNKNOWN_SOURCE.to_string(),
                threat: UNKNOWN_THREAT.to_string(),
                timestamp: modified_seconds(&self.dir.join(file)),
            });
            report.adopted += 1;
        }

        if report.changed() {
            log.rewrite(&kept)?;
        }
        Ok(report)
    }

    /// Move `path` into quarantine. `threat` defaults to [`MANUAL_THREAT`].
    pub fn quarantine(&self, path: &Path, threat: Option<&str>) -> Result<QuarantineEntry> {
        let log = self.log.lock();

        let meta = fs::symlink_metadata(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::SourceMissing(path.to_path_buf()),
            _ => Error::QuarantineFailed {
                path: path.to_path_buf(),
                source: e,
            },
        })?;
        if !meta.is_file() {
            return Err(Error::QuarantineFailed {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "not a regular file",
                ),
            });
        }

        let original = fs::canonicalize(path).map_err(|e| Error::QuarantineFailed {
            path: path.to_path_buf(),
            source: e,
        })?;
        if original.starts_with(&self.dir) {
            return Err(Error::QuarantineFailed {
                path: path.to_path_buf(),
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "file is already in quarantine",
                ),
            });
        }

        let contents = log.read()?;
        let file = self.unique_name(&original, &contents.entries);
        let entry = QuarantineEntry::new(
            file.clone(),
            original.display().to_string(),
            threat.unwrap_or(MANUAL_THREAT),
        );

        // Log first: a crash between here and the move is repaired on load.
        log.append(&entry)?;

        if let Err(e) = move_file(path, &self.dir.join(&file)) {
            log::error!("Failed to quarantine {:?}: {}", path, e);
            let rollback = log.read().and_then(|contents| {
                let remaining: Vec<_> = contents
                    .entries
                    .into_iter()
                    .filter(|existing| existing.file != file)
                    .collect();
                log.rewrite(&remaining)
            });
            if let Err(re) = rollback {
                log::error!("Could not roll back quarantine log entry {}: {}", file, re);
            }
            return Err(e);
        }

        log::info!("Quarantined {:?} as {} ({})", original, file, entry.threat);
        Ok(entry)
    }

    /// Move a quarantined file back to where it came from.
    pub fn restore(&self, filename: &str) -> Result<PathBuf> {
        let log = self.log.lock();
        let mut entries = log.read()?.entries;

        let idx = entries
            .iter()
            .position(|e| e.file == filename)
            .ok_or_else(|| Error::EntryNotFound(filename.to_string()))?;

        let dest = self.restore_one(&entries[idx])?;
        entries.remove(idx);
        log.rewrite(&entries)?;

        log::info!("Restored {} to {:?}", filename, dest);
        Ok(dest)
    }

    /// Restore every logged file; failures stay in the log.
    pub fn restore_all(&self) -> Result<RestoreSummary> {
        let log = self.log.lock();
        let entries = log.read()?.entries;
        if entries.is_empty() {
            return Ok(RestoreSummary::default());
        }

        let mut summary = RestoreSummary::default();
        let mut remaining = Vec::new();
        for entry in entries {
            match self.restore_one(&entry) {
                Ok(dest) => {
                    log::info!("Restored {} to {:?}", entry.file, dest);
                    summary.restored += 1;
                }
                Err(e) => {
                    log::warn!("Could not restore {}: {}", entry.file, e);
                    summary.failed += 1;
                    remaining.push(entry);
                }
            }
        }

        if summary.restored > 0 {
            log.rewrite(&remaining)?;
        }
        Ok(summary)
    }

    fn restore_one(&self, entry: &QuarantineEntry) -> Result<PathBuf> {
        if entry.original == UNKNOWN_SOURCE {
            return Err(Error::UnknownOrigin(entry.file.clone()));
        }

        let source = self.entry_path(&entry.file)?;
        if !source.is_file() {
            return Err(Error::FileMissing(entry.file.clone()));
        }

        let dest = PathBuf::from(&entry.original);
        if dest.exists() {
            return Err(Error::RestoreConflict(dest));
        }

        move_file(&source, &dest)?;
        Ok(dest)
    }

    /// Permanently delete a quarantined file and its entry.
    ///
    /// Returns `false` if there was nothing to delete.
    pub fn delete(&self, filename: &str) -> Result<bool> {
        let log = self.log.lock();
        let path = self.entry_path(filename)?;
        let removed_file = remove_file_if_exists(&path)?;

        let entries = log.read()?.entries;
        let before = entries.len();
        let remaining: Vec<_> = entries.into_iter().filter(|e| e.file != filename).collect();
        let removed_entry = remaining.len() != before;
        if removed_entry {
            log.rewrite(&remaining)?;
        }

        if removed_file || removed_entry {
            log::info!("Deleted quarantined file {}", filename);
        }
        Ok(removed_file || removed_entry)
    }

    /// Every entry, newest first, with its on-disk state.
    pub fn list(&self) -> Result<Vec<QuarantineListing>> {
        let log = self.log.lock();
        let entries = log.read()?.entries;
        let on_disk = self.quarantined_files()?;

        let mut logged = HashSet::new();
        let mut listing = Vec::with_capacity(entries.len());
        for entry in entries {
            if !logged.insert(entry.file.clone()) {
                continue;
            }
            let state = if on_disk.contains(&entry.file) {
                if entry.original == UNKNOWN_SOURCE {
                    EntryState::Orphaned
                } else {
                    EntryState::Ok
                }
            } else if self.never_moved(&entry) {
                continue;
            } else {
                EntryState::Lost
            };
            listing.push(QuarantineListing::from_entry(entry, state));
        }

        for file in on_disk.iter().filter(|f| !logged.contains(*f)) {
            listing.push(QuarantineListing {
                file: file.clone(),
                original: UNKNOWN_SOURCE.to_string(),
                threat: UNKNOWN_THREAT.to_string(),
                timestamp: modified_seconds(&self.dir.join(file)),
                state: EntryState::Orphaned,
            });
        }

        // Stable sort keeps later log lines first on equal timestamps.
        listing.reverse();
        listing.sort_by(|a, b| b.timestamp.total_cmp(&a.timestamp));
        Ok(listing)
    }

    fn entry_path(&self, filename: &str) -> Result<PathBuf> {
        let plain = Path::new(filename)
            .file_name()
            .map(|n| n == std::ffi::OsStr::new(filename))
            .unwrap_or(false);
        if !plain || filename == LOG_FILE {
            return Err(Error::EntryNotFound(filename.to_string()));
        }
        Ok(self.dir.join(filename))
    }

    fn never_moved(&self, entry: &QuarantineEntry) -> bool {
        entry.original != UNKNOWN_SOURCE && Path::new(&entry.original).is_file()
    }

    /// Names of suffixed files in the quarantine directory.
    fn quarantined_files(&self) -> Result<HashSet<String>> {
        let read = fs::read_dir(&self.dir).map_err(|e| Error::DirectoryAccess {
            path: self.dir.clone(),
            source: e,
        })?;

        Ok(read
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| name.ends_with(&self.suffix))
            .collect())
    }

    /// `<base><suffix>`, or `<base>.<n><suffix>` if that is taken.
    fn unique_name(&self, original: &Path, logged: &[QuarantineEntry]) -> String {
        let base = original
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let taken = |name: &str| self.dir.join(name).exists() || logged.iter().any(|e| e.file == name);

        let candidate = format!("{}{}", base, self.suffix);
        if !taken(&candidate) {
            return candidate;
        }
        let mut n = 1u32;
        loop {
            let candidate = format!("{}.{}{}", base, n, self.suffix);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

fn modified_seconds(path: &Path) -> f64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs_f64())
        .unwrap_or_else(now_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn manager() -> (TempDir, QuarantineManager) {
        let dir = tempdir().unwrap();
        let (manager, report) = QuarantineManager::open_at(dir.path().join("vault"), ".locked").unwrap();
        assert!(!report.changed());
        (dir, manager)
    }

    fn log_entries(manager: &QuarantineManager) -> Vec<QuarantineEntry> {
        manager.log.lock().read().unwrap().entries
    }

    #[test]
    fn test_round_trip() {
        let (dir, manager) = manager();
        let victim = dir.path().join("docs").join("invoice.exe");
        fs::create_dir_all(victim.parent().unwrap()).unwrap();
        fs::write(&victim, b"MZ payload bytes").unwrap();
        let original = fs::canonicalize(&victim).unwrap();

        let entry = manager.quarantine(&victim, Some("Trojan.Test")).unwrap();
        assert_eq!(entry.file, "invoice.exe.locked");
        assert_eq!(entry.threat, "Trojan.Test");
        assert!(!victim.exists());
        assert!(manager.dir().join("invoice.exe.locked").exists());

        let listing = manager.list().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].state, EntryState::Ok);

        let restored = manager.restore("invoice.exe.locked").unwrap();
        assert_eq!(restored, original);
        assert_eq!(fs::read(&victim).unwrap(), b"MZ payload bytes");
        assert!(log_entries(&manager).is_empty());
    }

    #[test]
    fn test_manual_label_and_collisions() {
        let (dir, manager) = manager();
        let a = dir.path().join("a").join("setup.exe");
        let b = dir.path().join("b").join("setup.exe");
        for p in [&a, &b] {
            fs::create_dir_all(p.parent().unwrap()).unwrap();
            fs::write(p, b"x").unwrap();
        }

        let first = manager.quarantine(&a, None).unwrap();
        let second = manager.quarantine(&b, None).unwrap();
        assert_eq!(first.file, "setup.exe.locked");
        assert_eq!(second.file, "setup.exe.1.locked");
        assert_eq!(first.threat, MANUAL_THREAT);
    }

    #[test]
    fn test_restore_all_is_idempotent() {
        let (dir, manager) = manager();
        for name in ["one.bin", "two.bin"] {
            let p = dir.path().join(name);
            fs::write(&p, name).unwrap();
            manager.quarantine(&p, None).unwrap();
        }

        assert_eq!(
            manager.restore_all().unwrap(),
            RestoreSummary {
                restored: 2,
                failed: 0
            }
        );
        assert_eq!(manager.restore_all().unwrap(), RestoreSummary::default());
        assert_eq!(manager.restore_all().unwrap(), RestoreSummary::default());
        assert!(dir.path().join("one.bin").exists());
    }

    #[test]
    fn test_restore_all_keeps_failures() {
        let (dir, manager) = manager();
        let ok = dir.path().join("ok.bin");
        let blocked = dir.path().join("blocked.bin");
        fs::write(&ok, "1").unwrap();
        fs::write(&blocked, "2").unwrap();
        manager.quarantine(&ok, None).unwrap();
        manager.quarantine(&blocked, None).unwrap();
        fs::write(&blocked, "new file in the way").unwrap();

        let summary = manager.restore_all().unwrap();
        assert_eq!(summary, RestoreSummary { restored: 1, failed: 1 });
        let remaining = log_entries(&manager);
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].file, "blocked.bin.locked");
    }

    #[test]
    fn test_orphan_is_adopted() {
        let dir = tempdir().unwrap();
        let vault = dir.path().join("vault");
        fs::create_dir_all(&vault).unwrap();
        fs::write(vault.join("mystery.dll.locked"), "?").unwrap();
        fs::write(vault.join("notes.txt"), "not quarantined").unwrap();

        let (manager, report) = QuarantineManager::open_at(&vault, ".locked").unwrap();
        assert_eq!(report.adopted, 1);

        let listing = manager.list().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].file, "mystery.dll.locked");
        assert_eq!(listing[0].threat, UNKNOWN_THREAT);
        assert_eq!(listing[0].original, UNKNOWN_SOURCE);
        assert_eq!(listing[0].state, EntryState::Orphaned);

        assert!(matches!(
            manager.restore("mystery.dll.locked"),
            Err(Error::UnknownOrigin(_))
        ));
    }

    #[test]
    fn test_double_quarantine() {
        let (dir, manager) = manager();
        let victim = dir.path().join("dup.exe");
        fs::write(&victim, "x").unwrap();

        assert!(manager.quarantine(&victim, None).is_ok());
        assert!(matches!(
            manager.quarantine(&victim, None),
            Err(Error::SourceMissing(_))
        ));
        assert_eq!(log_entries(&manager).len(), 1);
    }

    #[test]
    fn test_failed_restore_leaves_log() {
        let (dir, manager) = manager();
        let victim = dir.path().join("keep.exe");
        fs::write(&victim, "x").unwrap();
        manager.quarantine(&victim, None).unwrap();

        assert!(matches!(
            manager.restore("nope.locked"),
            Err(Error::EntryNotFound(_))
        ));
        assert_eq!(log_entries(&manager).len(), 1);

        fs::remove_file(manager.dir().join("keep.exe.locked")).unwrap();
        assert!(matches!(
            manager.restore("keep.exe.locked"),
            Err(Error::FileMissing(_))
        ));
        assert_eq!(log_entries(&manager).len(), 1);
        assert_eq!(manager.list().unwrap()[0].state, EntryState::Lost);
    }

    #[test]
    fn test_restore_refuses_overwrite() {
        let (dir, manager) = manager();
        let victim = dir.path().join("clash.exe");
        fs::write(&victim, "old").unwrap();
        manager.quarantine(&victim, None).unwrap();
        fs::write(&victim, "new").unwrap();

        assert!(matches!(
            manager.restore("clash.exe.locked"),
            Err(Error::RestoreConflict(_))
        ));
        assert_eq!(fs::read(&victim).unwrap(), b"new");
        assert_eq!(log_entries(&manager).len(), 1);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let (dir, manager) = manager();
        let victim = dir.path().join("gone.exe");
        fs::write(&victim, "x").unwrap();
        manager.quarantine(&victim, None).unwrap();

        assert!(manager.delete("gone.exe.locked").unwrap());
        assert!(!manager.delete("gone.exe.locked").unwrap());
        assert!(manager.list().unwrap().is_empty());
        assert!(!victim.exists());
    }

    #[test]
    fn test_rejects_path_names() {
        let (_dir, manager) = manager();
        assert!(matches!(
            manager.delete("../../etc/passwd"),
            Err(Error::EntryNotFound(_))
        ));
        assert!(matches!(
            manager.restore(LOG_FILE),
            Err(Error::EntryNotFound(_))
        ));
    }

    #[test]
    fn test_stale_entry_dropped_on_open() {
        let dir = tempdir().unwrap();
        let vault = dir.path().join("vault");
        fs::create_dir_all(&vault).unwrap();
        let victim = dir.path().join("still-here.exe");
        fs::write(&victim, "x").unwrap();

        // Logged, but the move never happened
        let log = QuarantineLog::new(vault.join(LOG_FILE));
        log.append(&QuarantineEntry::new(
            "still-here.exe.locked",
            victim.display().to_string(),
            "Test",
        ))
        .unwrap();

        let (manager, report) = QuarantineManager::open_at(&vault, ".locked").unwrap();
        assert_eq!(report.dropped_stale, 1);
        assert!(log_entries(&manager).is_empty());
        assert!(victim.exists());
    }

    #[test]
    fn test_lost_entry_reported() {
        let dir = tempdir().unwrap();
        let vault = dir.path().join("vault");
        fs::create_dir_all(&vault).unwrap();
        let log = QuarantineLog::new(vault.join(LOG_FILE));
        log.append(&QuarantineEntry::new(
            "vanished.exe.locked",
            dir.path().join("vanished.exe").display().to_string(),
            "Test",
        ))
        .unwrap();

        let (manager, report) = QuarantineManager::open_at(&vault, ".locked").unwrap();
        assert_eq!(report.lost, vec!["vanished.exe.locked".to_string()]);
        let listing = manager.list().unwrap();
        assert_eq!(listing[0].state, EntryState::Lost);
    }

    #[test]
    fn test_listing_newest_first() {
        let (dir, manager) = manager();
        for name in ["first.bin", "second.bin", "third.bin"] {
            let p = dir.path().join(name);
            fs::write(&p, name).unwrap();
            manager.quarantine(&p, None).unwrap();
        }
        let names: Vec<_> = manager.list().unwrap().into_iter().map(|l| l.file).collect();
        assert_eq!(
            names,
            vec!["third.bin.locked", "second.bin.locked", "first.bin.locked"]
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_vault_opened_through_symlink_guards_itself() {
        let dir = tempdir().unwrap();
        let real = dir.path().join("real");
        fs::create_dir_all(&real).unwrap();
        std::os::unix::fs::symlink(&real, dir.path().join("link")).unwrap();
        let vault = dir.path().join("link").join("vault");
        let (manager, _) = QuarantineManager::open_at(&vault, ".locked").unwrap();
        assert_eq!(manager.dir(), fs::canonicalize(&vault).unwrap());

        let victim = dir.path().join("a.exe");
        fs::write(&victim, b"payload").unwrap();
        manager.quarantine(&victim, Some("Trojan.Test")).unwrap();

        // Neither the log nor a quarantined file may be quarantined again,
        // whichever spelling of the vault path is used.
        for path in [
            vault.join(LOG_FILE),
            vault.join("a.exe.locked"),
            real.join("vault").join(LOG_FILE),
        ] {
            assert!(matches!(
                manager.quarantine(&path, None),
                Err(Error::QuarantineFailed { .. })
            ));
        }
        assert!(vault.join(LOG_FILE).is_file());

        let listing = manager.list().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].threat, "Trojan.Test");
        assert_eq!(listing[0].state, EntryState::Ok);

        let (reopened, report) = QuarantineManager::open_at(&vault, ".locked").unwrap();
        assert_eq!(report.adopted, 0);
        let restored = reopened.restore("a.exe.locked").unwrap();
        assert_eq!(restored, fs::canonicalize(dir.path()).unwrap().join("a.exe"));
    }
}
