//! Quarantine management.
//!
//! This module handles:
//! - Moving detected files into the quarantine directory
//! - The append-only quarantine log and its reconciliation with the disk
//! - File restoration and permanent deletion

pub mod journal;
pub mod manager;
pub mod operations;

pub use journal::{QuarantineEntry, QuarantineLog};
pub use manager::{
    EntryState, QuarantineListing, QuarantineManager, ReconcileReport, RestoreSummary,
    MANUAL_THREAT, UNKNOWN_SOURCE, UNKNOWN_THREAT,
};
pub use operations::{move_file, remove_file_if_exists, MoveMethod};
