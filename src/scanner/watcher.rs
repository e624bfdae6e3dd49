//! Real-time protection: classify files as they are created or modified.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::Alert;
use crate::detection::FileClassifier;
use crate::protocol::messages::{Event, WatchStatus};
use crate::scanner::coordinator::ScanCoordinator;
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Extensions of files that are still being written by a browser or editor.
const PARTIAL_EXTENSIONS: &[&str] = &["tmp", "crdownload"];

struct ActiveWatch {
    path: PathBuf,
    // Dropping the watcher unregisters it.
    _watcher: RecommendedWatcher,
    task: JoinHandle<()>,
}

/// Owns at most one recursive directory watch.
pub struct RealtimeWatcher {
    coordinator: ScanCoordinator,
    active: Mutex<Option<ActiveWatch>>,
}

impl RealtimeWatcher {
    pub fn new(coordinator: ScanCoordinator) -> Self {
        Self {
            coordinator,
            active: Mutex::new(None),
        }
    }

    /// Start watching `path`, replacing any existing watch.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, path: impl AsRef<Path>) -> Result<WatchStatus> {
        let path = std::fs::canonicalize(path.as_ref())
            .map_err(|_| Error::PathNotFound(path.as_ref().to_path_buf()))?;

        self.stop();

        let (tx, rx) = mpsc::unbounded_channel::<PathBuf>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            match res {
                Ok(event) => {
                    if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                        for path in event.paths {
                            let _ = tx.send(path);
                        }
                    }
                }
                Err(e) => log::warn!("Watch error: {}", e),
            }
        })?;
        watcher.watch(&path, RecursiveMode::Recursive)?;

        let task = tokio::spawn(process_events(self.coordinator.clone(), rx));
        *self.active.lock() = Some(ActiveWatch {
            path: path.clone(),
            _watcher: watcher,
            task,
        });

        log::info!("Watching {:?} for changes", path);
        let status = self.status();
        self.coordinator.emit(Event::WatchStatus(status.clone()));
        Ok(status)
    }

    /// Drop the current watch, if any.
    pub fn stop(&self) -> WatchStatus {
        if let Some(active) = self.active.lock().take() {
            active.task.abort();
            log::info!("Stopped watching {:?}", active.path);
            self.coordinator
                .emit(Event::WatchStatus(WatchStatus::default()));
        }
        WatchStatus::default()
    }

    pub fn status(&self) -> WatchStatus {
        match self.active.lock().as_ref() {
            Some(active) => WatchStatus {
                active: true,
                path: Some(active.path.display().to_string()),
            },
            None => WatchStatus::default(),
        }
    }
}

impl Drop for RealtimeWatcher {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.task.abort();
        }
    }
}

fn is_partial_download(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            PARTIAL_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// The quarantine directory as notify reports it, with symlinks resolved.
fn canonical_vault(config: &Config) -> PathBuf {
    let vault = config.quarantine.quarantine_dir();
    std::fs::canonicalize(&vault).unwrap_or(vault)
}

fn should_inspect(path: &Path, vault: &Path) -> bool {
    !is_partial_download(path) && !path.starts_with(vault)
}

async fn process_events(coordinator: ScanCoordinator, mut rx: mpsc::UnboundedReceiver<PathBuf>) {
    let vault = canonical_vault(coordinator.config());

    while let Some(first) = rx.recv().await {
        // One write usually produces a burst of events for the same file.
        let mut batch = BTreeSet::new();
        batch.insert(first);
        while let Ok(path) = rx.try_recv() {
            batch.insert(path);
        }

        let paths: Vec<PathBuf> = batch
            .into_iter()
            .filter(|p| should_inspect(p, &vault))
            .collect();
        if paths.is_empty() {
            continue;
        }

        let classifier = Arc::new(FileClassifier::new(
            coordinator.signatures().snapshot(),
            coordinator.config(),
        ));

        let results = tokio::task::spawn_blocking(move || {
            paths
                .into_iter()
                .filter(|p| p.is_file())
                .filter_map(|p| {
                    let result = classifier.classify_path(&p, &|| false)?;
                    Some((p, result))
                })
                .collect::<Vec<_>>()
        })
        .await;

        let results = match results {
            Ok(results) => results,
            Err(e) => {
                log::error!("Real-time classification failed: {}", e);
                continue;
            }
        };

        for (path, result) in results {
            if !result.verdict.is_threat() {
                continue;
            }
            let threat = result
                .threat
                .unwrap_or_else(|| "Suspicious Activity".to_string());
            log::warn!("Real-time detection: {} in {:?}", threat, path);

            coordinator.add_pending(path.display().to_string(), threat.clone());
            let label = format!("{} (Real-time)", threat);
            coordinator.emit(Event::Alert(Alert::detection(
                &path,
                result.verdict,
                Some(&label),
            )));
        }
    }
}
