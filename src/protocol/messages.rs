//! Wire messages: client commands and engine events.

use crate::core::types::{Alert, AlertUpdate, RunOutcome, ScanHistoryEntry, ScanMetrics};
use crate::quarantine::{QuarantineListing, RestoreSummary};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn default_true() -> bool {
    true
}

fn default_cpu_limit() -> u32 {
    100
}

/// A command sent by a client, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    StartScan {
        path: String,
        #[serde(default = "default_true")]
        recursive: bool,
        #[serde(default = "default_cpu_limit", rename = "cpuLimit")]
        cpu_limit: u32,
    },
    StopScan,
    PauseScan,
    ResumeScan,
    Reset,

    QuarantineFile {
        path: String,
    },
    GetQuarantine,
    RestoreQuarantine {
        filename: String,
    },
    RestoreAllQuarantine,
    DeleteQuarantine {
        filename: String,
    },

    ResolveThreat {
        data: ThreatResolution,
    },
    GetHistory,

    ReloadSignatures,
    GetSignatures,
    SaveSignatures {
        data: Vec<String>,
    },

    GetSettings,
    SaveSettings {
        data: Map<String, Value>,
    },

    ListDir {
        #[serde(default)]
        path: Option<String>,
    },
    StartWatch {
        path: String,
    },
    StopWatch,
    GetWatchStatus,
}

impl Command {
    /// Decode one line of client input.
    pub fn parse(line: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(line)
    }
}

/// Operator decision for a pending detection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatResolution {
    pub file: String,
    pub action: String,
}

/// What to do with a pending detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreatAction {
    Quarantine,
    Ignore,
}

impl std::str::FromStr for ThreatAction {
    type Err = crate::core::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quarantine" => Ok(ThreatAction::Quarantine),
            "ignore" => Ok(ThreatAction::Ignore),
            _ => Err(crate::core::error::Error::UnknownAction(s.to_string())),
        }
    }
}

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirItem {
    pub name: String,
    pub is_directory: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirListing {
    pub path: String,
    pub items: Vec<DirItem>,
}

/// Real-time watch state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WatchStatus {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Scan activity notice sent when a run ends or the engine is reset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanState {
    pub scanning: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<RunOutcome>,
}

/// An event sent to clients as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum Event {
    Metrics(ScanMetrics),
    Alert(Alert),
    AlertUpdate(AlertUpdate),
    QuarantineList(Vec<QuarantineListing>),
    RestoreSummary(RestoreSummary),
    History(Vec<ScanHistoryEntry>),
    HistoryEntry(ScanHistoryEntry),
    Signatures(Vec<String>),
    Settings(Value),
    DirList(DirListing),
    DirError(String),
    WatchStatus(WatchStatus),
    Status(ScanState),
    Error(String),
}

impl Event {
    pub fn error(message: impl std::fmt::Display) -> Self {
        Event::Error(message.to_string())
    }

    /// Encode as one line of JSON, without the trailing newline.
    pub fn to_line(&self) -> crate::core::error::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}
