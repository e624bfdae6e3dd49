//! Error types and result handling for vigil.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for vigil operations.
#[derive(Error, Debug)]
pub enum Error {
    // ===== I/O Errors =====
    #[error("Failed to read file: {path}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file: {path}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to delete file: {path}")]
    FileDelete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to access directory: {path}")]
    DirectoryAccess {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),

    // ===== Configuration Errors =====
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    #[error("Failed to save configuration: {0}")]
    ConfigSave(String),

    #[error("Invalid configuration value: {field} - {message}")]
    ConfigInvalid { field: String, message: String },

    // ===== Signature Errors =====
    #[error("Failed to load signatures: {0}")]
    SignatureLoad(String),

    // ===== Scanning Errors =====
    #[error("Invalid scan target: {path} - {reason}")]
    InvalidTarget { path: PathBuf, reason: String },

    #[error("Cannot {action} while scan is {state}")]
    InvalidTransition { action: String, state: String },

    #[error("Worker pool failed to start: {0}")]
    WorkerPool(String),

    // ===== Quarantine Errors =====
    #[error("Quarantine entry not found: {0}")]
    EntryNotFound(String),

    #[error("Quarantined file is missing from disk: {0}")]
    FileMissing(String),

    #[error("File to quarantine does not exist: {0}")]
    SourceMissing(PathBuf),

    #[error("Original location of {0} is unknown")]
    UnknownOrigin(String),

    #[error("Refusing to overwrite existing file at {0}")]
    RestoreConflict(PathBuf),

    #[error("Failed to quarantine file: {path}")]
    QuarantineFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cross-device move failed: {from} -> {to}")]
    CrossDeviceMove {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Copy verification failed for {0}")]
    CopyVerification(PathBuf),

    // ===== Protocol Errors =====
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Unknown threat action: {0}")]
    UnknownAction(String),

    #[error("No pending threat for {0}")]
    NoPendingThreat(String),

    #[error("Watch error: {0}")]
    Watch(String),

    // ===== Concurrency Errors =====
    #[error("Background task failed: {0}")]
    TaskJoin(String),

    // ===== Serialization Errors =====
    #[error("JSON serialization error")]
    JsonSerialize(#[from] serde_json::Error),

    // ===== Generic Errors =====
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl From<notify::Error> for Error {
    fn from(err: notify::Error) -> Self {
        Error::Watch(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskJoin(err.to_string())
    }
}

impl Error {
    /// Create a file read error.
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Create a file write error.
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a file delete error.
    pub fn file_delete(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileDelete {
            path: path.into(),
            source,
        }
    }

    /// Create an invalid target error.
    pub fn invalid_target(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid state transition error.
    pub fn invalid_transition(action: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            action: action.into(),
            state: state.to_string(),
        }
    }

    /// Get a user-friendly suggestion for how to resolve this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::PathNotFound(_) | Error::InvalidTarget { .. } => {
                Some("Check that the path exists and is accessible")
            }
            Error::ConfigLoad(_) | Error::ConfigInvalid { .. } => {
                Some("Check your configuration file for syntax errors or missing fields")
            }
            Error::SignatureLoad(_) => {
                Some("Check the signatures file: one pattern per line, UTF-8 encoded")
            }
            Error::EntryNotFound(_) => {
                Some("The quarantine item may have been deleted or restored already")
            }
            Error::FileMissing(_) => {
                Some("The quarantined file was removed outside vigil; delete the entry")
            }
            Error::RestoreConflict(_) => {
                Some("Move the existing file out of the way, then restore again")
            }
            Error::InvalidTransition { .. } => Some("Check the current scan status first"),
            _ => None,
        }
    }

    /// Get the error category, used as a prefix in logs and CLI hints.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::FileRead { .. }
            | Error::FileWrite { .. }
            | Error::FileDelete { .. }
            | Error::DirectoryAccess { .. }
            | Error::PathNotFound(_)
            | Error::Io(_) => ErrorCategory::Io,

            Error::ConfigLoad(_) | Error::ConfigSave(_) | Error::ConfigInvalid { .. } => {
                ErrorCategory::Configuration
            }

            Error::SignatureLoad(_) => ErrorCategory::Signatures,

            Error::InvalidTarget { .. }
            | Error::InvalidTransition { .. }
            | Error::WorkerPool(_) => ErrorCategory::Scanning,

            Error::EntryNotFound(_)
            | Error::FileMissing(_)
            | Error::SourceMissing(_)
            | Error::UnknownOrigin(_)
            | Error::RestoreConflict(_)
            | Error::QuarantineFailed { .. }
            | Error::CrossDeviceMove { .. }
            | Error::CopyVerification(_) => ErrorCategory::Quarantine,

            Error::InvalidMessage(_)
            | Error::UnknownAction(_)
            | Error::NoPendingThreat(_)
            | Error::Watch(_) => ErrorCategory::Protocol,

            Error::TaskJoin(_) => ErrorCategory::Concurrency,

            Error::JsonSerialize(_) => ErrorCategory::Serialization,

            Error::Internal(_) => ErrorCategory::Internal,
        }
    }
}

/// Error categories for logging and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Io,
    Configuration,
    Signatures,
    Scanning,
    Quarantine,
    Protocol,
    Concurrency,
    Serialization,
    Internal,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Io => "I/O",
            ErrorCategory::Configuration => "Configuration",
            ErrorCategory::Signatures => "Signatures",
            ErrorCategory::Scanning => "Scanning",
            ErrorCategory::Quarantine => "Quarantine",
            ErrorCategory::Protocol => "Protocol",
            ErrorCategory::Concurrency => "Concurrency",
            ErrorCategory::Serialization => "Serialization",
            ErrorCategory::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::EntryNotFound("a.txt.locked".to_string());
        assert_eq!(err.to_string(), "Quarantine entry not found: a.txt.locked");

        let err = Error::invalid_transition("pause", "IDLE");
        assert_eq!(err.to_string(), "Cannot pause while scan is IDLE");
    }

    #[test]
    fn test_error_category() {
        assert_eq!(
            Error::FileMissing("x".to_string()).category(),
            ErrorCategory::Quarantine
        );
        assert_eq!(
            Error::InvalidMessage("bad".to_string()).category(),
            ErrorCategory::Protocol
        );
        assert_eq!(
            Error::from(std::io::Error::new(std::io::ErrorKind::Other, "x")).category(),
            ErrorCategory::Io
        );
        assert_eq!(ErrorCategory::Io.to_string(), "I/O");
    }

    #[test]
    fn test_suggestions() {
        assert!(Error::EntryNotFound("x".to_string()).suggestion().is_some());
        assert!(Error::Internal("x".to_string()).suggestion().is_none());
    }
}
