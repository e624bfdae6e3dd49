//! Core type definitions shared by the scanner, quarantine and protocol layers.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Outcome of classifying one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    /// No signature or heuristic matched
    Clean,
    /// A heuristic flagged the file
    Warning,
    /// A signature matched
    Infected,
    /// The file could not be read
    Error,
}

impl Verdict {
    /// Whether this verdict needs operator attention.
    pub fn is_threat(&self) -> bool {
        matches!(self, Verdict::Warning | Verdict::Infected)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::Warning => "warning",
            Verdict::Infected => "infected",
            Verdict::Error => "error",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verdict plus the threat name for non-clean results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub verdict: Verdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat: Option<String>,
    /// Bytes read while classifying
    #[serde(default)]
    pub bytes_read: u64,
}

impl Classification {
    pub fn clean(bytes_read: u64) -> Self {
        Self {
            verdict: Verdict::Clean,
            threat: None,
            bytes_read,
        }
    }

    pub fn infected(threat: impl Into<String>, bytes_read: u64) -> Self {
        Self {
            verdict: Verdict::Infected,
            threat: Some(threat.into()),
            bytes_read,
        }
    }

    pub fn warning(threat: impl Into<String>, bytes_read: u64) -> Self {
        Self {
            verdict: Verdict::Warning,
            threat: Some(threat.into()),
            bytes_read,
        }
    }

    /// Classification of an unreadable file; `reason` is kept for logging.
    pub fn error(reason: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Error,
            threat: Some(reason.into()),
            bytes_read: 0,
        }
    }
}

/// One file travelling from the walker through a worker to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub path: PathBuf,
    pub size: u64,
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threat: Option<String>,
    pub thread_id: Option<usize>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub bytes_read: u64,
}

impl FileRecord {
    /// Create a record for a freshly enumerated file.
    pub fn queued(path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            verdict: None,
            threat: None,
            thread_id: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            bytes_read: 0,
        }
    }

    /// Mark the record as claimed by a worker.
    pub fn start(&mut self, thread_id: usize) {
        self.thread_id = Some(thread_id);
        self.started_at = Some(Utc::now());
    }

    /// Attach the verdict. A record is only finished once.
    pub fn finish(&mut self, classification: Classification) {
        if self.verdict.is_some() {
            return;
        }
        self.verdict = Some(classification.verdict);
        self.threat = classification.threat;
        self.bytes_read = classification.bytes_read;
        self.finished_at = Some(Utc::now());
    }

    /// Processing time in milliseconds, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Activity of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Idle,
    Busy,
    Blocked,
    Error,
}

/// Per-worker state record, written only by its owning worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadState {
    pub id: usize,
    pub status: ThreadStatus,
    pub current_file: Option<PathBuf>,
    pub files_processed: u64,
}

impl ThreadState {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            status: ThreadStatus::Idle,
            current_file: None,
            files_processed: 0,
        }
    }
}

/// Global scan status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScanStatus {
    Idle,
    Warmup,
    Scanning,
    Paused,
    Cooldown,
    Error,
}

impl ScanStatus {
    /// Whether a run is attached to the coordinator in this state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ScanStatus::Warmup | ScanStatus::Scanning | ScanStatus::Paused | ScanStatus::Cooldown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Idle => "IDLE",
            ScanStatus::Warmup => "WARMUP",
            ScanStatus::Scanning => "SCANNING",
            ScanStatus::Paused => "PAUSED",
            ScanStatus::Cooldown => "COOLDOWN",
            ScanStatus::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate telemetry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanMetrics {
    pub files_scanned: u64,
    pub threats_detected: u64,
    pub errors: u64,
    pub active_threads: usize,
    pub total_threads: usize,
    /// Files per second over the last window
    pub scan_speed: f64,
    /// Host CPU load, percent
    pub cpu_load: f32,
    /// Host memory usage, percent
    pub memory_usage: f32,
    /// MiB per second read by classifiers
    #[serde(rename = "diskIO")]
    pub disk_io: f64,
    pub status: ScanStatus,
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self {
            files_scanned: 0,
            threats_detected: 0,
            errors: 0,
            active_threads: 0,
            total_threads: 0,
            scan_speed: 0.0,
            cpu_load: 0.0,
            memory_usage: 0.0,
            disk_io: 0.0,
            status: ScanStatus::Idle,
        }
    }
}

/// What to scan and how hard to work at it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanTarget {
    pub root: PathBuf,
    pub recursive: bool,
    /// CPU budget in percent, always within 10..=100
    pub cpu_limit: u8,
}

impl ScanTarget {
    pub const MIN_CPU_LIMIT: u8 = 10;
    pub const MAX_CPU_LIMIT: u8 = 100;

    pub fn new(root: impl Into<PathBuf>, recursive: bool, cpu_limit: u8) -> Self {
        Self {
            root: root.into(),
            recursive,
            cpu_limit: cpu_limit.clamp(Self::MIN_CPU_LIMIT, Self::MAX_CPU_LIMIT),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunOutcome {
    Completed,
    Cancelled,
}

/// Persisted record of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanHistoryEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub path: String,
    pub files_scanned: u64,
    pub threats_detected: u64,
    pub duration_ms: u64,
    pub status: RunOutcome,
}

/// Alert category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertKind {
    /// A detection needing disposition
    Virus,
    /// Progress narration
    Info,
    /// Engine-level notices
    System,
}

/// Status carried by an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Clean,
    Warning,
    Infected,
    Error,
    Quarantined,
    Ignored,
}

impl From<Verdict> for AlertStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Clean => AlertStatus::Clean,
            Verdict::Warning => AlertStatus::Warning,
            Verdict::Infected => AlertStatus::Infected,
            Verdict::Error => AlertStatus::Error,
        }
    }
}

/// An event surfaced to operators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub file: String,
    pub threat: String,
    pub status: AlertStatus,
    pub time: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
}

impl Alert {
    pub fn new(
        file: impl Into<String>,
        threat: impl Into<String>,
        status: AlertStatus,
        kind: AlertKind,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file: file.into(),
            threat: threat.into(),
            status,
            time: Local::now().format("%H:%M:%S").to_string(),
            kind,
        }
    }

    /// Detection alert for a finished record.
    pub fn detection(path: &Path, verdict: Verdict, threat: Option<&str>) -> Self {
        Self::new(
            path.display().to_string(),
            threat.unwrap_or("Suspicious Activity"),
            verdict.into(),
            AlertKind::Virus,
        )
    }

    /// Narration alert.
    pub fn info(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(file, message, AlertStatus::Clean, AlertKind::Info)
    }
}

/// Status change on an existing alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertUpdate {
    pub file: String,
    pub status: AlertStatus,
}
