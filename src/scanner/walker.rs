//! Lazy directory traversal feeding the bounded work queue.

use crate::core::config::ScanConfig;
use crate::core::types::FileRecord;
use crate::scanner::control::ScanControl;
use crossbeam_channel::{SendTimeoutError, Sender};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use walkdir::{DirEntry, WalkDir};

/// How often a walker blocked on a full queue re-checks for cancellation.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(100);

/// Traversal options for one run.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    pub recursive: bool,
    pub follow_symlinks: bool,
    pub max_depth: usize,
    pub exclude_paths: Vec<String>,
}

impl WalkOptions {
    pub fn from_config(config: &ScanConfig, recursive: bool) -> Self {
        Self {
            recursive,
            follow_symlinks: config.follow_symlinks,
            max_depth: config.max_depth.max(1),
            exclude_paths: config.exclude_paths.clone(),
        }
    }
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self::from_config(&ScanConfig::default(), true)
    }
}

/// Counters the walker shares with the coordinator.
#[derive(Debug, Default)]
pub struct WalkStats {
    pub enqueued: AtomicU64,
    pub errors: AtomicU64,
}

impl WalkStats {
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }
}

/// Why [`DirectoryWalker::feed`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// Every reachable file was queued
    Exhausted,
    /// The run was cancelled
    Cancelled,
    /// All workers are gone
    Disconnected,
}

/// Enumerates regular files below a root.
#[derive(Debug, Clone)]
pub struct DirectoryWalker {
    root: PathBuf,
    options: WalkOptions,
}

impl DirectoryWalker {
    pub fn new(root: impl Into<PathBuf>, options: WalkOptions) -> Self {
        Self {
            root: root.into(),
            options,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start a fresh traversal. Order is sorted by file name.
    pub fn entries<'a>(&self, stats: &'a WalkStats) -> Entries<'a> {
        let depth = if self.options.recursive {
            self.options.max_depth
        } else {
            1
        };

        let excludes = self.options.exclude_paths.clone();
        let filter: EntryFilter =
            Box::new(move |entry: &DirEntry| !is_excluded(entry.path(), &excludes));

        let inner = WalkDir::new(&self.root)
            .follow_links(self.options.follow_symlinks)
            .max_depth(depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(filter);

        Entries {
            inner,
            seen: self.options.follow_symlinks.then(HashSet::new),
            depth_limit: self.options.recursive.then_some(depth),
            stats,
        }
    }

    /// Push every file into `queue`, blocking while it is full.
    pub fn feed(
        &self,
        queue: &Sender<FileRecord>,
        control: &ScanControl,
        stats: &WalkStats,
    ) -> WalkOutcome {
        for record in self.entries(stats) {
            if control.is_cancelled() {
                return WalkOutcome::Cancelled;
            }

            let mut pending = record;
            loop {
                match queue.send_timeout(pending, BACKPRESSURE_POLL) {
                    Ok(()) => {
                        stats.enqueued.fetch_add(1, Ordering::Relaxed);
                        break;
                    }
                    Err(SendTimeoutError::Timeout(back)) => {
                        if control.is_cancelled() {
                            return WalkOutcome::Cancelled;
                        }
                        pending = back;
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        return WalkOutcome::Disconnected;
                    }
                }
            }
        }

        log::debug!(
            "Walk of {:?} finished: {} files queued, {} traversal errors",
            self.root,
            stats.enqueued(),
            stats.errors()
        );
        WalkOutcome::Exhausted
    }
}

fn is_excluded(path: &Path, excludes: &[String]) -> bool {
    excludes
        .iter()
        .any(|ex| !ex.is_empty() && path.starts_with(ex))
}

type EntryFilter = Box<dyn FnMut(&DirEntry) -> bool + Send>;

/// Lazy file sequence produced by [`DirectoryWalker::entries`].
pub struct Entries<'a> {
    inner: walkdir::FilterEntry<walkdir::IntoIter, EntryFilter>,
    seen: Option<HashSet<PathBuf>>,
    /// Directories at this depth are listed but not entered
    depth_limit: Option<usize>,
    stats: &'a WalkStats,
}

impl Entries<'_> {
    fn record_skip(&self, path: Option<&Path>, reason: &dyn std::fmt::Display) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
        log::debug!("Skipping {:?}: {}", path, reason);
    }
}

impl Iterator for Entries<'_> {
    type Item = FileRecord;

    fn next(&mut self) -> Option<FileRecord> {
        loop {
            let entry = match self.inner.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    if let Some(ancestor) = err.loop_ancestor() {
                        self.record_skip(err.path(), &format!("symlink cycle back to {:?}", ancestor));
                    } else {
                        self.record_skip(err.path(), &err);
                    }
                    continue;
                }
            };

            if entry.file_type().is_dir() {
                if self.depth_limit == Some(entry.depth()) {
                    log::warn!("Not descending into {:?}: depth limit reached", entry.path());
                    self.record_skip(Some(entry.path()), &"depth limit reached");
                }
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }

            if let Some(seen) = self.seen.as_mut() {
                let canonical = std::fs::canonicalize(entry.path())
                    .unwrap_or_else(|_| entry.path().to_path_buf());
                if !seen.insert(canonical) {
                    continue;
                }
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => {
                    self.record_skip(Some(entry.path()), &err);
                    continue;
                }
            };

            return Some(FileRecord::queued(entry.into_path(), size));
        }
    }
}
