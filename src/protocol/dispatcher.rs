//! Maps each client command to an engine call.
//!
//! Replies go back to the requesting client only. State changes that every
//! client should see are broadcast through the coordinator.

use crate::core::error::{Error, Result};
use crate::core::types::{Alert, AlertKind, AlertStatus, AlertUpdate, ScanTarget};
use crate::engine::Engine;
use crate::protocol::messages::{
    Command, DirItem, DirListing, Event, ThreatAction, ThreatResolution,
};
use crate::quarantine::MANUAL_THREAT;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Run a blocking filesystem job off the async workers.
async fn blocking<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(job).await?
}

#[derive(Clone)]
pub struct Dispatcher {
    engine: Engine,
}

impl Dispatcher {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Snapshot sent to a newly connected client.
    pub async fn greeting(&self) -> Vec<Event> {
        let mut events = vec![Event::Metrics(self.engine.coordinator().metrics())];
        match self.quarantine_list().await {
            Ok(list) => events.push(list),
            Err(e) => events.push(Event::error(e)),
        }
        events.push(Event::History(self.engine.coordinator().history().load()));
        events
    }

    /// Execute `command` and return the replies for the caller.
    pub async fn handle(&self, command: Command) -> Vec<Event> {
        log::debug!("Handling {:?}", command);
        let result = match command {
            Command::StartScan {
                path,
                recursive,
                cpu_limit,
            } => self.start_scan(path, recursive, cpu_limit).await,
            Command::StopScan => self.stop_scan().await,
            Command::PauseScan => self.pause_scan().await,
            Command::ResumeScan => self.resume_scan().await,
            Command::Reset => self.reset().await,
            Command::QuarantineFile { path } => self.quarantine_file(path).await,
            Command::GetQuarantine => self.quarantine_list().await.map(|e| vec![e]),
            Command::RestoreQuarantine { filename } => self.restore_quarantine(filename).await,
            Command::RestoreAllQuarantine => self.restore_all().await,
            Command::DeleteQuarantine { filename } => self.delete_quarantine(filename).await,
            Command::ResolveThreat { data } => self.resolve_threat(data).await,
            Command::GetHistory => Ok(vec![Event::History(
                self.engine.coordinator().history().load(),
            )]),
            Command::ReloadSignatures => self.reload_signatures().await,
            Command::GetSignatures => self.signatures().await,
            Command::SaveSignatures { data } => self.save_signatures(data).await,
            Command::GetSettings => Ok(vec![Event::Settings(Value::Object(
                self.engine.settings().load(),
            ))]),
            Command::SaveSettings { data } => self.save_settings(data).await,
            Command::ListDir { path } => Ok(vec![list_dir(path).await]),
            Command::StartWatch { path } => self.start_watch(path),
            Command::StopWatch => Ok(self.stop_watch()),
            Command::GetWatchStatus => {
                Ok(vec![Event::WatchStatus(self.engine.watcher().status())])
            }
        };

        result.unwrap_or_else(|e| {
            log::warn!("{} command failed: {}", e.category(), e);
            vec![Event::error(e)]
        })
    }

    async fn start_scan(&self, path: String, recursive: bool, cpu_limit: u32) -> Result<Vec<Event>> {
        let cpu_limit = cpu_limit.min(ScanTarget::MAX_CPU_LIMIT as u32) as u8;
        let target = ScanTarget::new(path, recursive, cpu_limit);
        // Failures are already broadcast by the coordinator.
        if let Err(e) = self.engine.coordinator().start(target).await {
            log::debug!("Scan did not start: {}", e);
        }
        Ok(Vec::new())
    }

    async fn stop_scan(&self) -> Result<Vec<Event>> {
        self.engine.coordinator().stop().await?;
        Ok(Vec::new())
    }

    async fn pause_scan(&self) -> Result<Vec<Event>> {
        self.engine.coordinator().pause().await?;
        Ok(Vec::new())
    }

    async fn resume_scan(&self) -> Result<Vec<Event>> {
        self.engine.coordinator().resume().await?;
        Ok(Vec::new())
    }

    async fn reset(&self) -> Result<Vec<Event>> {
        self.engine.coordinator().reset().await?;
        Ok(Vec::new())
    }

    async fn quarantine_list(&self) -> Result<Event> {
        let manager = self.engine.quarantine().clone();
        let list = blocking(move || manager.list()).await?;
        Ok(Event::QuarantineList(list))
    }

    async fn quarantine_file(&self, path: String) -> Result<Vec<Event>> {
        let manager = self.engine.quarantine().clone();
        let target = PathBuf::from(&path);
        blocking(move || manager.quarantine(&target, Some(MANUAL_THREAT))).await?;

        if self.engine.coordinator().take_pending(&path).is_some() {
            self.broadcast_update(&path, AlertStatus::Quarantined);
        }
        Ok(vec![self.quarantine_list().await?])
    }

    async fn restore_quarantine(&self, filename: String) -> Result<Vec<Event>> {
        let manager = self.engine.quarantine().clone();
        let restored = blocking(move || manager.restore(&filename)).await;
        let mut replies = Vec::new();
        if let Err(e) = restored {
            replies.push(Event::Error(format!("Restore failed: {}", e)));
        }
        replies.push(self.quarantine_list().await?);
        Ok(replies)
    }

    async fn restore_all(&self) -> Result<Vec<Event>> {
        let manager = self.engine.quarantine().clone();
        let summary = blocking(move || manager.restore_all()).await?;

        self.engine.coordinator().emit(Event::Alert(Alert::new(
            "Batch Restore",
            format!("Restored {} files", summary.restored),
            AlertStatus::Clean,
            AlertKind::System,
        )));
        Ok(vec![
            Event::RestoreSummary(summary),
            self.quarantine_list().await?,
        ])
    }

    async fn delete_quarantine(&self, filename: String) -> Result<Vec<Event>> {
        let manager = self.engine.quarantine().clone();
        blocking(move || manager.delete(&filename)).await?;
        Ok(vec![self.quarantine_list().await?])
    }

    async fn resolve_threat(&self, resolution: ThreatResolution) -> Result<Vec<Event>> {
        let action: ThreatAction = resolution.action.parse()?;
        let file = resolution.file;
        let coordinator = self.engine.coordinator();

        match action {
            ThreatAction::Quarantine => {
                let pending = coordinator.take_pending(&file);
                let threat = pending.clone().unwrap_or_else(|| MANUAL_THREAT.to_string());
                let manager = self.engine.quarantine().clone();
                let target = PathBuf::from(&file);

                if let Err(e) = blocking(move || manager.quarantine(&target, Some(&threat))).await {
                    if let Some(threat) = pending {
                        coordinator.add_pending(file.clone(), threat);
                    }
                    return Err(e);
                }
                self.broadcast_update(&file, AlertStatus::Quarantined);
                Ok(vec![self.quarantine_list().await?])
            }
            ThreatAction::Ignore => {
                coordinator
                    .take_pending(&file)
                    .ok_or_else(|| Error::NoPendingThreat(file.clone()))?;
                log::info!("Ignoring detection in {}", file);
                self.broadcast_update(&file, AlertStatus::Ignored);
                Ok(Vec::new())
            }
        }
    }

    fn broadcast_update(&self, file: &str, status: AlertStatus) {
        self.engine
            .coordinator()
            .emit(Event::AlertUpdate(AlertUpdate {
                file: file.to_string(),
                status,
            }));
    }

    async fn signatures(&self) -> Result<Vec<Event>> {
        let registry = self.engine.coordinator().signatures().clone();
        let lines = blocking(move || registry.raw_lines()).await?;
        Ok(vec![Event::Signatures(lines)])
    }

    async fn reload_signatures(&self) -> Result<Vec<Event>> {
        let registry = self.engine.coordinator().signatures().clone();
        // A running scan keeps the snapshot it started with.
        let count = blocking(move || registry.reload()).await?;
        log::info!("Reloaded {} signatures", count);

        let mut replies = self.signatures().await?;
        replies.push(Event::Alert(Alert::new(
            "Signatures",
            format!("Loaded {} signatures", count),
            AlertStatus::Clean,
            AlertKind::System,
        )));
        Ok(replies)
    }

    async fn save_signatures(&self, lines: Vec<String>) -> Result<Vec<Event>> {
        let registry = self.engine.coordinator().signatures().clone();
        let count = blocking(move || registry.save_lines(&lines)).await?;
        log::info!("Saved signatures, {} loaded", count);
        self.signatures().await
    }

    async fn save_settings(&self, patch: Map<String, Value>) -> Result<Vec<Event>> {
        let store = self.engine.settings().clone();
        let merged = blocking(move || store.merge(patch)).await?;
        Ok(vec![Event::Settings(Value::Object(merged))])
    }

    /// The watcher broadcasts every status change itself.
    fn start_watch(&self, path: String) -> Result<Vec<Event>> {
        self.engine.watcher().start(&path)?;
        Ok(Vec::new())
    }

    fn stop_watch(&self) -> Vec<Event> {
        let watcher = self.engine.watcher();
        if watcher.status().active {
            watcher.stop();
            Vec::new()
        } else {
            vec![Event::WatchStatus(watcher.stop())]
        }
    }
}

/// List a directory for the folder picker. No path lists the filesystem roots.
async fn list_dir(path: Option<String>) -> Event {
    let path = path.filter(|p| !p.trim().is_empty() && p != ".");
    let listed = tokio::task::spawn_blocking(move || match path {
        Some(path) => read_dir_items(Path::new(&path)),
        None => list_roots(),
    })
    .await;

    match listed {
        Ok(Ok(listing)) => Event::DirList(listing),
        Ok(Err(e)) => Event::DirError(e.to_string()),
        Err(e) => Event::DirError(e.to_string()),
    }
}

fn read_dir_items(path: &Path) -> std::io::Result<DirListing> {
    let resolved = std::fs::canonicalize(path)?;
    let mut items: Vec<DirItem> = std::fs::read_dir(&resolved)?
        .flatten()
        .map(|entry| DirItem {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_directory: entry.path().is_dir(),
        })
        .collect();
    items.sort_by(|a, b| {
        b.is_directory
            .cmp(&a.is_directory)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });

    Ok(DirListing {
        path: resolved.display().to_string(),
        items,
    })
}

#[cfg(windows)]
fn list_roots() -> std::io::Result<DirListing> {
    let items = (b'A'..=b'Z')
        .map(|letter| format!("{}:\\", letter as char))
        .filter(|drive| Path::new(drive).exists())
        .map(|drive| DirItem {
            name: drive,
            is_directory: true,
        })
        .collect();
    Ok(DirListing {
        path: String::new(),
        items,
    })
}

#[cfg(not(windows))]
fn list_roots() -> std::io::Result<DirListing> {
    read_dir_items(Path::new("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::Config;
    use crate::core::types::ScanStatus;
    use crate::detection::signature::EICAR_STRING;
    use crate::quarantine::RestoreSummary;
    use tempfile::{tempdir, TempDir};

    fn dispatcher() -> (TempDir, Dispatcher) {
        let dir = tempdir().unwrap();
        let mut config = Config::rooted_at(&dir.path().join("data"));
        config.scan.worker_threads = 2;
        config.engine.metrics_interval_ms = 50;
        let engine = Engine::open(config).unwrap();
        (dir, Dispatcher::new(engine))
    }

    fn quarantine_len(events: &[Event]) -> Option<usize> {
        events.iter().find_map(|e| match e {
            Event::QuarantineList(list) => Some(list.len()),
            _ => None,
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_greeting() {
        let (_dir, dispatcher) = dispatcher();
        let events = dispatcher.greeting().await;
        assert!(matches!(events[0], Event::Metrics(_)));
        assert!(matches!(events[1], Event::QuarantineList(_)));
        assert!(matches!(events[2], Event::History(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_scan_then_resolve_threat() {
        let (dir, dispatcher) = dispatcher();
        let root = dir.path().join("scan");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::write(root.join("clean.txt"), "ok").unwrap();
        std::fs::write(root.join("eicar.txt"), EICAR_STRING).unwrap();
        let mut events = dispatcher.engine().coordinator().subscribe();

        let replies = dispatcher
            .handle(Command::StartScan {
                path: root.display().to_string(),
                recursive: true,
                cpu_limit: 100,
            })
            .await;
        assert!(replies.is_empty());
        dispatcher.engine().coordinator().wait_idle().await;
        assert_eq!(
            dispatcher.engine().coordinator().status(),
            ScanStatus::Idle
        );

        let infected = std::fs::canonicalize(root.join("eicar.txt"))
            .unwrap()
            .display()
            .to_string();
        let replies = dispatcher
            .handle(Command::ResolveThreat {
                data: ThreatResolution {
                    file: infected.clone(),
                    action: "quarantine".to_string(),
                },
            })
            .await;
        assert_eq!(quarantine_len(&replies), Some(1));
        assert!(!root.join("eicar.txt").exists());

        let mut saw_update = false;
        while let Ok(event) = events.try_recv() {
            if let Event::AlertUpdate(update) = event {
                assert_eq!(update.file, infected);
                assert_eq!(update.status, AlertStatus::Quarantined);
                saw_update = true;
            }
        }
        assert!(saw_update);

        let replies = dispatcher.handle(Command::RestoreAllQuarantine).await;
        assert!(replies.contains(&Event::RestoreSummary(RestoreSummary {
            restored: 1,
            failed: 0
        })));
        assert!(root.join("eicar.txt").exists());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_ignore_without_pending() {
        let (_dir, dispatcher) = dispatcher();
        let replies = dispatcher
            .handle(Command::ResolveThreat {
                data: ThreatResolution {
                    file: "/nowhere".to_string(),
                    action: "ignore".to_string(),
                },
            })
            .await;
        assert!(matches!(&replies[0], Event::Error(msg) if msg.contains("No pending threat")));

        let replies = dispatcher
            .handle(Command::ResolveThreat {
                data: ThreatResolution {
                    file: "/nowhere".to_string(),
                    action: "shred".to_string(),
                },
            })
            .await;
        assert!(matches!(&replies[0], Event::Error(msg) if msg.contains("shred")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_when_idle_is_rejected() {
        let (_dir, dispatcher) = dispatcher();
        let replies = dispatcher.handle(Command::PauseScan).await;
        assert!(matches!(&replies[0], Event::Error(msg) if msg.contains("pause")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restore_unknown_reports_error() {
        let (_dir, dispatcher) = dispatcher();
        let replies = dispatcher
            .handle(Command::RestoreQuarantine {
                filename: "missing.locked".to_string(),
            })
            .await;
        assert!(matches!(&replies[0], Event::Error(msg) if msg.starts_with("Restore failed")));
        assert_eq!(quarantine_len(&replies), Some(0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_signatures_and_settings() {
        let (_dir, dispatcher) = dispatcher();
        let replies = dispatcher
            .handle(Command::SaveSignatures {
                data: vec!["Test.Marker=evil-marker".to_string(), "# comment".to_string()],
            })
            .await;
        assert!(matches!(&replies[0], Event::Signatures(lines) if lines.len() == 2));
        let store = dispatcher.engine().coordinator().signatures().snapshot();
        assert_eq!(store.matches(b"an evil-marker here"), Some("Test.Marker"));

        let mut patch = Map::new();
        patch.insert("theme".to_string(), Value::from("dark"));
        let replies = dispatcher.handle(Command::SaveSettings { data: patch }).await;
        assert!(matches!(&replies[0], Event::Settings(v) if v["theme"] == "dark"));
        let replies = dispatcher.handle(Command::GetSettings).await;
        assert!(matches!(&replies[0], Event::Settings(v) if v["theme"] == "dark"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_list_dir() {
        let (dir, dispatcher) = dispatcher();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let replies = dispatcher
            .handle(Command::ListDir {
                path: Some(dir.path().display().to_string()),
            })
            .await;
        match &replies[0] {
            Event::DirList(listing) => {
                assert!(listing.items[0].is_directory);
                assert!(listing.items.iter().any(|i| i.name == "a.txt" && !i.is_directory));
            }
            other => panic!("unexpected {:?}", other),
        }

        let replies = dispatcher
            .handle(Command::ListDir {
                path: Some(dir.path().join("missing").display().to_string()),
            })
            .await;
        assert!(matches!(replies[0], Event::DirError(_)));
    }
}
