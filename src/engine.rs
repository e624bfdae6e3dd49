//! Engine assembly: every long-lived component, created once at startup.

use crate::core::config::Config;
use crate::core::error::Result;
use crate::detection::SignatureRegistry;
use crate::protocol::settings::SettingsStore;
use crate::quarantine::QuarantineManager;
use crate::scanner::{RealtimeWatcher, ScanCoordinator};
use std::sync::Arc;

/// Shared handle to the running engine. Cloning is cheap.
#[derive(Clone)]
pub struct Engine {
    coordinator: ScanCoordinator,
    quarantine: Arc<QuarantineManager>,
    settings: Arc<SettingsStore>,
    watcher: Arc<RealtimeWatcher>,
}

impl Engine {
    /// Validate `config`, load signatures and reconcile the quarantine.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;

        let (signatures, load_error) = SignatureRegistry::open(
            config.detection.signature_path(),
            config.detection.builtin_eicar,
        );
        if let Some(e) = load_error {
            log::warn!("Starting with built-in signatures only: {}", e);
        }
        let store = signatures.snapshot();
        log::info!(
            "Loaded {} signatures from {:?} ({} lines rejected)",
            store.len(),
            signatures.path(),
            store.rejected().len()
        );

        let (quarantine, report) = QuarantineManager::open(&config.quarantine)?;
        if report.changed() || !report.lost.is_empty() {
            log::warn!(
                "Quarantine reconciled: {} adopted, {} stale, {} lost, {} unreadable lines",
                report.adopted,
                report.dropped_stale,
                report.lost.len(),
                report.discarded_lines
            );
        }

        let settings = SettingsStore::new(config.engine.settings_path());
        let coordinator = ScanCoordinator::new(config, Arc::new(signatures));
        let watcher = RealtimeWatcher::new(coordinator.clone());

        Ok(Self {
            coordinator,
            quarantine: Arc::new(quarantine),
            settings: Arc::new(settings),
            watcher: Arc::new(watcher),
        })
    }

    pub fn config(&self) -> &Config {
        self.coordinator.config()
    }

    pub fn coordinator(&self) -> &ScanCoordinator {
        &self.coordinator
    }

    pub fn quarantine(&self) -> &Arc<QuarantineManager> {
        &self.quarantine
    }

    pub fn settings(&self) -> &Arc<SettingsStore> {
        &self.settings
    }

    pub fn watcher(&self) -> &Arc<RealtimeWatcher> {
        &self.watcher
    }

    /// Stop the watcher and any running scan.
    pub async fn shutdown(&self) -> Result<()> {
        self.watcher.stop();
        self.coordinator.stop().await
    }
}
