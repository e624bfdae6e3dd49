//! File system scanning.
//!
//! This module provides the scan pipeline:
//! - Directory traversal feeding a bounded queue
//! - A worker pool with pause, cancel and CPU throttling
//! - The scan coordinator state machine and its metrics tick
//! - Persisted scan history
//! - Real-time directory watching

pub mod control;
pub mod coordinator;
pub mod history;
pub mod pool;
pub mod progress;
pub mod walker;
pub mod watcher;

pub use control::ScanControl;
pub use coordinator::{ClassifierFactory, ScanCoordinator};
pub use history::HistoryStore;
pub use pool::{PoolContext, ThreadArena, Throttle, WorkerPool};
pub use progress::{SpeedMeter, SystemSampler};
pub use walker::{DirectoryWalker, WalkOptions, WalkOutcome, WalkStats};
pub use watcher::RealtimeWatcher;
