//! Scan coordinator: owns the run lifecycle and publishes telemetry.
//!
//! ```text
//! IDLE -> WARMUP -> SCANNING <-> PAUSED -> COOLDOWN -> IDLE
//!            \-> ERROR
//! ```
//!
//! One run at a time. Workers and the walker live on plain threads; the
//! coordinator side runs as a tokio task that drains finished records and
//! ticks the metrics snapshot.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{
    Alert, AlertKind, AlertStatus, FileRecord, RunOutcome, ScanHistoryEntry, ScanMetrics,
    ScanStatus, ScanTarget, Verdict,
};
use crate::detection::{Classifier, FileClassifier, SignatureRegistry, SignatureStore};
use crate::protocol::messages::{Event, ScanState};
use crate::scanner::control::ScanControl;
use crate::scanner::history::HistoryStore;
use crate::scanner::pool::{PoolContext, ThreadArena, Throttle, WorkerPool};
use crate::scanner::progress::{SpeedMeter, SystemSampler};
use crate::scanner::walker::{DirectoryWalker, WalkOptions, WalkOutcome, WalkStats};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Builds the classifier for a run from the signature snapshot taken at start.
pub type ClassifierFactory =
    Arc<dyn Fn(Arc<SignatureStore>) -> Arc<dyn Classifier> + Send + Sync>;

struct Shared {
    config: Config,
    signatures: Arc<SignatureRegistry>,
    factory: ClassifierFactory,
    history: HistoryStore,
    events: broadcast::Sender<Event>,
    status: watch::Sender<ScanStatus>,
    snapshot: Mutex<ScanMetrics>,
    /// Detections awaiting an operator decision, keyed by file path
    pending: Mutex<HashMap<String, String>>,
    run: tokio::sync::Mutex<Option<ActiveRun>>,
}

/// Handle the protocol layer uses to drive runs.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Shared>,
}

struct ActiveRun {
    control: Arc<ScanControl>,
    stop_requested: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// Everything the driver task owns for one run.
struct RunState {
    root: PathBuf,
    results: mpsc::Receiver<FileRecord>,
    arena: Arc<ThreadArena>,
    pool: WorkerPool,
    walker: std::thread::JoinHandle<WalkOutcome>,
    walk_stats: Arc<WalkStats>,
    stop_requested: Arc<AtomicBool>,
    started: Instant,
}

impl ScanCoordinator {
    pub fn new(config: Config, signatures: Arc<SignatureRegistry>) -> Self {
        let classifier_config = config.clone();
        let factory: ClassifierFactory = Arc::new(move |store: Arc<SignatureStore>| {
            Arc::new(FileClassifier::new(store, &classifier_config)) as Arc<dyn Classifier>
        });
        Self::with_classifier(config, signatures, factory)
    }

    /// Use a custom classifier for every run.
    pub fn with_classifier(
        config: Config,
        signatures: Arc<SignatureRegistry>,
        factory: ClassifierFactory,
    ) -> Self {
        let (events, _) = broadcast::channel(config.engine.event_buffer.max(16));
        let (status, _) = watch::channel(ScanStatus::Idle);
        let history = HistoryStore::new(
            config.engine.history_path(),
            config.engine.history_limit,
        );

        Self {
            inner: Arc::new(Shared {
                config,
                signatures,
                factory,
                history,
                events,
                status,
                snapshot: Mutex::new(ScanMetrics::default()),
                pending: Mutex::new(HashMap::new()),
                run: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn signatures(&self) -> &Arc<SignatureRegistry> {
        &self.inner.signatures
    }

    pub fn history(&self) -> &HistoryStore {
        &self.inner.history
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub fn watch_status(&self) -> watch::Receiver<ScanStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> ScanStatus {
        *self.inner.status.borrow()
    }

    /// Latest reported snapshot.
    pub fn metrics(&self) -> ScanMetrics {
        self.inner.snapshot.lock().clone()
    }

    /// Broadcast an event to every subscriber.
    pub fn emit(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.inner.events.send(event);
    }

    fn set_status(&self, status: ScanStatus) {
        self.inner.status.send_replace(status);
        let snapshot = {
            let mut snap = self.inner.snapshot.lock();
            snap.status = status;
            snap.clone()
        };
        log::debug!("Scan status -> {}", status);
        self.emit(Event::Metrics(snapshot));
    }

    /// Begin a run. Any active run is stopped and drained first.
    pub async fn start(&self, target: ScanTarget) -> Result<()> {
        let mut slot = self.inner.run.lock().await;
        if let Some(previous) = slot.take() {
            log::info!("Stopping previous scan before starting a new one");
            self.finish_active(previous).await;
        }

        *self.inner.snapshot.lock() = ScanMetrics::default();
        self.set_status(ScanStatus::Warmup);

        let root = match validate_root(&target.root) {
            Ok(root) => root,
            Err(e) => {
                log::error!("Cannot scan {:?}: {}", target.root, e);
                self.set_status(ScanStatus::Error);
                self.emit(Event::error(&e));
                return Err(e);
            }
        };

        let cfg = &self.inner.config;
        let store = self.inner.signatures.snapshot();
        log::info!(
            "Scanning {:?} with {} signatures (cpu limit {}%)",
            root,
            store.len(),
            target.cpu_limit
        );
        let classifier = (self.inner.factory)(store);

        let control = Arc::new(ScanControl::new());
        let (queue_tx, queue_rx) = crossbeam_channel::bounded(cfg.scan.queue_capacity.max(1));
        let (results_tx, results_rx) = mpsc::channel(cfg.scan.queue_capacity.max(16));

        let pool = WorkerPool::spawn(
            cfg.scan.worker_threads,
            PoolContext {
                queue: queue_rx,
                classifier,
                control: Arc::clone(&control),
                results: results_tx,
                throttle: Throttle::new(target.cpu_limit),
            },
        );
        let pool = match pool {
            Ok(pool) => pool,
            Err(e) => {
                log::error!("{}", e);
                self.set_status(ScanStatus::Error);
                self.emit(Event::error(&e));
                return Err(e);
            }
        };

        let walk_stats = Arc::new(WalkStats::default());
        let walker = DirectoryWalker::new(
            root.clone(),
            WalkOptions::from_config(&cfg.scan, target.recursive),
        );
        let walker_control = Arc::clone(&control);
        let walker_stats = Arc::clone(&walk_stats);
        let walker = std::thread::Builder::new()
            .name("scan-walker".to_string())
            .spawn(move || walker.feed(&queue_tx, &walker_control, &walker_stats));

        let walker = match walker {
            Ok(handle) => handle,
            Err(e) => {
                control.cancel();
                let _ = tokio::task::spawn_blocking(move || pool.join()).await;
                let err = Error::WorkerPool(format!("could not start walker: {}", e));
                self.set_status(ScanStatus::Error);
                self.emit(Event::error(&err));
                return Err(err);
            }
        };

        {
            let mut snap = self.inner.snapshot.lock();
            snap.total_threads = pool.size();
        }
        self.set_status(ScanStatus::Scanning);
        self.emit(Event::Alert(Alert::info(
            root.display().to_string(),
            format!("Scan started: {}", root.display()),
        )));

        let stop_requested = Arc::new(AtomicBool::new(false));
        let run = RunState {
            root,
            results: results_rx,
            arena: Arc::clone(pool.arena()),
            pool,
            walker,
            walk_stats,
            stop_requested: Arc::clone(&stop_requested),
            started: Instant::now(),
        };

        let driver = tokio::spawn(self.clone().drive(run));
        *slot = Some(ActiveRun {
            control,
            stop_requested,
            driver,
        });
        Ok(())
    }

    /// Cancel the active run and wait until it has fully wound down.
    ///
    /// Calling this with no active run does nothing.
    pub async fn stop(&self) -> Result<()> {
        let mut slot = self.inner.run.lock().await;
        if let Some(active) = slot.take() {
            self.finish_active(active).await;
        }
        Ok(())
    }

    async fn finish_active(&self, active: ActiveRun) {
        active.stop_requested.store(true, Ordering::SeqCst);
        active.control.cancel();
        if let Err(e) = active.driver.await {
            log::error!("Scan driver failed: {}", e);
            self.set_status(ScanStatus::Error);
            self.emit(Event::error(Error::from(e)));
        }
    }

    pub async fn pause(&self) -> Result<()> {
        let slot = self.inner.run.lock().await;
        self.transition("pause", ScanStatus::Scanning, ScanStatus::Paused)?;
        if let Some(active) = slot.as_ref() {
            active.control.pause();
        }
        self.publish_status();
        log::info!("Scan paused");
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        let slot = self.inner.run.lock().await;
        self.transition("resume", ScanStatus::Paused, ScanStatus::Scanning)?;
        if let Some(active) = slot.as_ref() {
            active.control.resume();
        }
        self.publish_status();
        log::info!("Scan resumed");
        Ok(())
    }

    fn transition(&self, action: &str, from: ScanStatus, to: ScanStatus) -> Result<()> {
        let mut current = from;
        let changed = self.inner.status.send_if_modified(|status| {
            current = *status;
            if *status == from {
                *status = to;
                true
            } else {
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(Error::invalid_transition(action, current))
        }
    }

    fn publish_status(&self) {
        let status = self.status();
        self.inner.snapshot.lock().status = status;
        self.emit(Event::Metrics(self.metrics()));
    }

    /// Stop any run, forget pending detections and zero the snapshot.
    pub async fn reset(&self) -> Result<()> {
        self.stop().await?;
        self.inner.pending.lock().clear();
        *self.inner.snapshot.lock() = ScanMetrics::default();
        self.set_status(ScanStatus::Idle);
        self.emit(Event::Status(ScanState {
            scanning: false,
            outcome: None,
        }));
        Ok(())
    }

    /// Wait until no run is active.
    pub async fn wait_idle(&self) {
        let mut rx = self.inner.status.subscribe();
        let _ = rx.wait_for(|status| !status.is_active()).await;
    }

    /// Record a detection that needs an operator decision.
    pub fn add_pending(&self, file: impl Into<String>, threat: impl Into<String>) {
        self.inner.pending.lock().insert(file.into(), threat.into());
    }

    /// Remove and return the pending threat label for `file`.
    pub fn take_pending(&self, file: &str) -> Option<String> {
        self.inner.pending.lock().remove(file)
    }

    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    async fn drive(self, mut run: RunState) {
        let interval = Duration::from_millis(self.inner.config.engine.metrics_interval_ms.max(50));
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut meter = SpeedMeter::new();
        let mut sampler = SystemSampler::new();

        loop {
            tokio::select! {
                next = run.results.recv() => match next {
                    Some(record) => self.on_record(record),
                    None => break,
                },
                _ = ticker.tick() => self.tick(&run, &mut meter, &mut sampler),
            }
        }

        self.set_status(ScanStatus::Cooldown);

        let RunState {
            root,
            arena,
            pool,
            walker,
            walk_stats,
            stop_requested,
            started,
            ..
        } = run;

        let joined = tokio::task::spawn_blocking(move || {
            pool.join();
            walker.join().unwrap_or_else(|_| {
                log::error!("Walker thread panicked");
                WalkOutcome::Cancelled
            })
        })
        .await;

        let walk = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                log::error!("Failed to join scan threads: {}", e);
                WalkOutcome::Cancelled
            }
        };

        let outcome = if stop_requested.load(Ordering::SeqCst) || walk != WalkOutcome::Exhausted {
            RunOutcome::Cancelled
        } else {
            RunOutcome::Completed
        };

        let (tally, _) = arena.totals();
        let final_metrics = {
            let mut snap = self.inner.snapshot.lock();
            snap.files_scanned = tally.files;
            snap.threats_detected = tally.threats;
            snap.errors = tally.errors + walk_stats.errors();
            snap.active_threads = 0;
            snap.scan_speed = 0.0;
            snap.disk_io = 0.0;
            snap.status = ScanStatus::Idle;
            snap.clone()
        };

        let entry = ScanHistoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            path: root.display().to_string(),
            files_scanned: tally.files,
            threats_detected: tally.threats,
            duration_ms: started.elapsed().as_millis() as u64,
            status: outcome,
        };

        // History is a JSON file rewritten on every append.
        let shared = Arc::clone(&self.inner);
        let record = entry.clone();
        let saved = tokio::task::spawn_blocking(move || {
            shared
                .history
                .append(record)
                .map_err(|e| (e, shared.history.load()))
        })
        .await;
        let entries = match saved {
            Ok(Ok(entries)) => entries,
            Ok(Err((e, entries))) => {
                log::error!("Failed to save scan history: {}", e);
                self.emit(Event::error(&e));
                entries
            }
            Err(e) => {
                log::error!("History task failed: {}", e);
                self.emit(Event::error(Error::from(e)));
                Vec::new()
            }
        };

        log::info!(
            "Scan of {:?} {}: {} files, {} threats, {} errors in {} ms",
            root,
            match outcome {
                RunOutcome::Completed => "completed",
                RunOutcome::Cancelled => "cancelled",
            },
            tally.files,
            tally.threats,
            final_metrics.errors,
            entry.duration_ms
        );

        self.emit(Event::Alert(Alert::new(
            root.display().to_string(),
            format!(
                "Scan completed: {} files, {} threats",
                tally.files, tally.threats
            ),
            AlertStatus::Clean,
            AlertKind::Info,
        )));
        self.emit(Event::Metrics(final_metrics));
        self.emit(Event::HistoryEntry(entry));
        self.emit(Event::History(entries));
        self.emit(Event::Status(ScanState {
            scanning: false,
            outcome: Some(outcome),
        }));

        self.inner.status.send_replace(ScanStatus::Idle);
    }

    fn on_record(&self, record: FileRecord) {
        match record.verdict {
            Some(verdict) if verdict.is_threat() => {
                let file = record.path.display().to_string();
                let threat = record
                    .threat
                    .clone()
                    .unwrap_or_else(|| "Suspicious Activity".to_string());
                log::warn!("Detected {} in {}", threat, file);
                self.add_pending(file, threat.clone());
                self.emit(Event::Alert(Alert::detection(
                    &record.path,
                    verdict,
                    Some(&threat),
                )));
            }
            Some(Verdict::Error) => {
                log::debug!(
                    "Could not classify {:?}: {}",
                    record.path,
                    record.threat.as_deref().unwrap_or("unknown error")
                );
            }
            _ => {}
        }
    }

    fn tick(&self, run: &RunState, meter: &mut SpeedMeter, sampler: &mut SystemSampler) {
        let (tally, busy) = run.arena.totals();
        let rate = meter.sample(Instant::now(), tally.files, tally.bytes);
        let load = sampler.sample();
        let status = self.status();

        let snapshot = {
            let mut snap = self.inner.snapshot.lock();
            snap.files_scanned = tally.files;
            snap.threats_detected = tally.threats;
            snap.errors = tally.errors + run.walk_stats.errors();
            snap.active_threads = busy;
            snap.total_threads = run.arena.len();
            snap.scan_speed = rate.files_per_sec;
            snap.disk_io = rate.mib_per_sec;
            snap.cpu_load = load.cpu;
            snap.memory_usage = load.memory;
            snap.status = status;
            snap.clone()
        };
        self.emit(Event::Metrics(snapshot));
    }
}

/// Resolve the scan root and make sure it can be read.
fn validate_root(root: &Path) -> Result<PathBuf> {
    if root.as_os_str().is_empty() {
        return Err(Error::invalid_target(root, "no path given"));
    }

    let canonical = std::fs::canonicalize(root).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::invalid_target(root, "path does not exist"),
        std::io::ErrorKind::PermissionDenied => Error::invalid_target(root, "permission denied"),
        _ => Error::invalid_target(root, e.to_string()),
    })?;

    let meta = std::fs::metadata(&canonical)
        .map_err(|e| Error::invalid_target(root, e.to_string()))?;
    if meta.is_dir() {
        std::fs::read_dir(&canonical)
            .map_err(|e| Error::invalid_target(root, format!("cannot read directory: {}", e)))?;
    } else if !meta.is_file() {
        return Err(Error::invalid_target(root, "not a regular file or directory"));
    }

    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Classification;
    use crate::detection::signature::EICAR_STRING;
    use std::collections::HashSet;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn setup(workers: usize) -> (TempDir, Config, Arc<SignatureRegistry>) {
        let dir = tempdir().unwrap();
        let mut config = Config::rooted_at(&dir.path().join("data"));
        config.scan.worker_threads = workers;
        config.engine.metrics_interval_ms = 50;
        let (registry, _) = SignatureRegistry::open(config.detection.signature_path(), true);
        (dir, config, Arc::new(registry))
    }

    fn populate(root: &Path, count: usize) {
        fs::create_dir_all(root).unwrap();
        for i in 0..count {
            fs::write(root.join(format!("file-{:05}.txt", i)), "harmless").unwrap();
        }
    }

    fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Sleeps per file and remembers every path it finished.
    struct RecordingClassifier {
        delay: Duration,
        seen: Mutex<Vec<PathBuf>>,
    }

    impl Classifier for RecordingClassifier {
        fn classify(
            &self,
            record: &FileRecord,
            interrupted: &dyn Fn() -> bool,
        ) -> Option<Classification> {
            std::thread::sleep(self.delay);
            if interrupted() {
                return None;
            }
            self.seen.lock().push(record.path.clone());
            Some(Classification::clean(record.size))
        }
    }

    fn recording(
        config: Config,
        registry: Arc<SignatureRegistry>,
        delay: Duration,
    ) -> (ScanCoordinator, Arc<RecordingClassifier>) {
        let classifier = Arc::new(RecordingClassifier {
            delay,
            seen: Mutex::new(Vec::new()),
        });
        let shared = Arc::clone(&classifier);
        let factory: ClassifierFactory =
            Arc::new(move |_store: Arc<SignatureStore>| Arc::clone(&shared) as Arc<dyn Classifier>);
        (
            ScanCoordinator::with_classifier(config, registry, factory),
            classifier,
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_three_files_one_threat() {
        let (dir, config, registry) = setup(4);
        let root = dir.path().join("target");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("a.txt"), "alpha").unwrap();
        fs::write(root.join("b.txt"), "beta").unwrap();
        fs::write(root.join("eicar.com.txt"), EICAR_STRING).unwrap();

        let coordinator = ScanCoordinator::new(config, registry);
        let mut events = coordinator.subscribe();

        coordinator
            .start(ScanTarget::new(&root, true, 100))
            .await
            .unwrap();
        coordinator.wait_idle().await;

        let metrics = coordinator.metrics();
        assert_eq!(metrics.files_scanned, 3);
        assert_eq!(metrics.threats_detected, 1);
        assert_eq!(metrics.status, ScanStatus::Idle);

        let events = drain(&mut events);
        let infected: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                Event::Alert(a) if a.kind == AlertKind::Virus => Some(a),
                _ => None,
            })
            .collect();
        assert_eq!(infected.len(), 1);
        assert_eq!(infected[0].status, AlertStatus::Infected);
        assert!(events.iter().any(|e| matches!(
            e,
            Event::Status(ScanState {
                scanning: false,
                outcome: Some(RunOutcome::Completed)
            })
        )));

        let history = coordinator.history().load();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].files_scanned, 3);
        assert_eq!(history[0].threats_detected, 1);
        assert_eq!(history[0].status, RunOutcome::Completed);
        assert_eq!(coordinator.pending_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_files_scanned_never_decreases() {
        let (dir, config, registry) = setup(2);
        let root = dir.path().join("ticks");
        populate(&root, 200);

        let (coordinator, _) = recording(config, registry, Duration::from_millis(5));
        let mut events = coordinator.subscribe();
        coordinator
            .start(ScanTarget::new(&root, true, 100))
            .await
            .unwrap();

        let mut counts = Vec::new();
        let mut final_status = None;
        loop {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
                .await
                .expect("run did not finish")
                .unwrap();
            match event {
                Event::Metrics(m) => {
                    counts.push(m.files_scanned);
                    final_status = Some(m.status);
                }
                Event::Status(ScanState { scanning: false, .. }) => break,
                _ => {}
            }
        }

        assert!(counts.len() >= 3, "only {} metrics events", counts.len());
        assert!(
            counts.windows(2).all(|w| w[0] <= w[1]),
            "files_scanned went backwards: {:?}",
            counts
        );
        assert_eq!(counts.last(), Some(&200));
        assert_eq!(final_status, Some(ScanStatus::Idle));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_stop_mid_walk() {
        let (dir, config, registry) = setup(2);
        let root = dir.path().join("big");
        populate(&root, 2000);

        let (coordinator, classifier) = recording(config, registry, Duration::from_millis(5));
        coordinator
            .start(ScanTarget::new(&root, true, 100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        coordinator.stop().await.unwrap();

        // stop returns only after the pool has been joined
        assert_eq!(coordinator.status(), ScanStatus::Idle);
        let reached = classifier.seen.lock().len() as u64;
        let history = coordinator.history().load();
        assert_eq!(history[0].status, RunOutcome::Cancelled);
        assert_eq!(history[0].files_scanned, reached);
        assert!(reached < 2000);
        assert_eq!(coordinator.metrics().files_scanned, reached);

        // a second stop is a no-op
        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.history().load().len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_resume_loses_nothing() {
        let (dir, config, registry) = setup(4);
        let root = dir.path().join("tree");
        populate(&root, 300);

        let (coordinator, classifier) = recording(config, registry, Duration::from_millis(2));
        coordinator
            .start(ScanTarget::new(&root, true, 100))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.pause().await.unwrap();
        assert_eq!(coordinator.status(), ScanStatus::Paused);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let paused_at = classifier.seen.lock().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(classifier.seen.lock().len(), paused_at);

        assert!(coordinator.pause().await.is_err());
        coordinator.resume().await.unwrap();
        coordinator.wait_idle().await;

        let seen = classifier.seen.lock().clone();
        let unique: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(seen.len(), 300);
        assert_eq!(unique.len(), 300);
        assert_eq!(coordinator.history().load()[0].status, RunOutcome::Completed);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_invalid_root_enters_error() {
        let (dir, config, registry) = setup(2);
        let coordinator = ScanCoordinator::new(config, registry);
        let mut events = coordinator.subscribe();

        let err = coordinator
            .start(ScanTarget::new(dir.path().join("missing"), true, 100))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTarget { .. }));
        assert_eq!(coordinator.status(), ScanStatus::Error);
        assert!(drain(&mut events).iter().any(|e| matches!(e, Event::Error(_))));
        assert!(coordinator.history().load().is_empty());

        // a fresh start recovers
        let root = dir.path().join("ok");
        populate(&root, 2);
        coordinator
            .start(ScanTarget::new(&root, true, 100))
            .await
            .unwrap();
        coordinator.wait_idle().await;
        assert_eq!(coordinator.status(), ScanStatus::Idle);
        assert_eq!(coordinator.metrics().files_scanned, 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_pause_and_resume_need_matching_state() {
        let (_dir, config, registry) = setup(2);
        let coordinator = ScanCoordinator::new(config, registry);

        assert!(matches!(
            coordinator.pause().await,
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            coordinator.resume().await,
            Err(Error::InvalidTransition { .. })
        ));
        coordinator.stop().await.unwrap();
        assert_eq!(coordinator.status(), ScanStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_restart_stops_previous_run() {
        let (dir, config, registry) = setup(2);
        let big = dir.path().join("big");
        let small = dir.path().join("small");
        populate(&big, 1000);
        populate(&small, 3);

        let (coordinator, _) = recording(config, registry, Duration::from_millis(5));
        coordinator
            .start(ScanTarget::new(&big, true, 100))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        coordinator
            .start(ScanTarget::new(&small, true, 100))
            .await
            .unwrap();
        coordinator.wait_idle().await;

        let history = coordinator.history().load();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].status, RunOutcome::Completed);
        assert_eq!(history[0].files_scanned, 3);
        assert_eq!(history[1].status, RunOutcome::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_reset_clears_snapshot() {
        let (dir, config, registry) = setup(2);
        let root = dir.path().join("r");
        populate(&root, 4);

        let coordinator = ScanCoordinator::new(config, registry);
        coordinator.add_pending("/tmp/x", "Test.X");
        coordinator
            .start(ScanTarget::new(&root, true, 100))
            .await
            .unwrap();
        coordinator.wait_idle().await;
        assert_eq!(coordinator.metrics().files_scanned, 4);

        coordinator.reset().await.unwrap();
        assert_eq!(coordinator.metrics().files_scanned, 0);
        assert_eq!(coordinator.pending_count(), 0);
        assert_eq!(coordinator.take_pending("/tmp/x"), None);
    }
}
