//! vigil: a multi-threaded file scanning engine
//!
//! A directory walker feeds a bounded queue drained by a pool of classifier
//! threads. A coordinator owns the scan lifecycle and streams metrics and
//! alerts to clients over newline-delimited JSON. Detected files can be moved
//! into a quarantine directory and restored from it.

pub mod core;
pub mod detection;
pub mod engine;
pub mod protocol;
pub mod quarantine;
pub mod scanner;
pub mod ui;
pub mod utils;

// Re-export commonly used types
pub use crate::core::config::Config;
pub use crate::core::error::{Error, Result};
pub use crate::core::types::*;
pub use crate::engine::Engine;
