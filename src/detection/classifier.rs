//! File classification: signatures first, then heuristics.

use crate::core::config::Config;
use crate::core::types::{Classification, FileRecord};
use crate::detection::entropy::EntropyAccumulator;
use crate::detection::signature::SignatureStore;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;

/// Threat name for executables hiding behind a document extension.
pub const DOUBLE_EXTENSION: &str = "Heuristic.DoubleExtension";
/// Threat name for high-entropy executables.
pub const PACKED_EXECUTABLE: &str = "Heuristic.PackedExecutable";

const DECOY_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "txt", "rtf", "jpg", "jpeg", "png", "gif",
    "mp3", "mp4", "avi", "zip",
];

/// Turns a file into a verdict.
///
/// `interrupted` is polled between read chunks; returning `None` means the
/// classification was abandoned and must not be counted.
pub trait Classifier: Send + Sync {
    fn classify(&self, record: &FileRecord, interrupted: &dyn Fn() -> bool)
        -> Option<Classification>;
}

/// Heuristic knobs taken from [`Config`].
#[derive(Debug, Clone)]
pub struct HeuristicSettings {
    pub enabled: bool,
    pub entropy_threshold: f64,
    pub executable_extensions: HashSet<String>,
}

impl HeuristicSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.detection.heuristics_enabled,
            entropy_threshold: config.detection.entropy_threshold,
            executable_extensions: config
                .detection
                .executable_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    fn is_executable(&self, ext: &str) -> bool {
        self.executable_extensions.contains(ext)
    }
}

/// Streaming classifier over a fixed signature snapshot.
pub struct FileClassifier {
    store: Arc<SignatureStore>,
    heuristics: HeuristicSettings,
    chunk_size: usize,
    max_scan_bytes: u64,
}

impl FileClassifier {
    pub fn new(store: Arc<SignatureStore>, config: &Config) -> Self {
        Self {
            store,
            heuristics: HeuristicSettings::from_config(config),
            chunk_size: config.scan.chunk_size.max(512),
            max_scan_bytes: config.scan.max_scan_bytes.max(1),
        }
    }

    pub fn with_limits(mut self, chunk_size: usize, max_scan_bytes: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.max_scan_bytes = max_scan_bytes.max(1);
        self
    }

    pub fn store(&self) -> &Arc<SignatureStore> {
        &self.store
    }

    /// Classify the file at `path`.
    pub fn classify_path(
        &self,
        path: &Path,
        interrupted: &dyn Fn() -> bool,
    ) -> Option<Classification> {
        let mut file = match File::open(path) {
            Ok(f) => f,
            Err(e) => {
                log::debug!("Cannot open {:?}: {}", path, e);
                return Some(Classification::error(format!("open failed: {}", e)));
            }
        };

        let overlap = self.store.max_pattern_len().saturating_sub(1);
        let mut buf = vec![0u8; self.chunk_size];
        let mut window: Vec<u8> = Vec::with_capacity(self.chunk_size + overlap);
        let mut hasher = Sha256::new();
        let mut entropy = EntropyAccumulator::new();
        let mut read_total = 0u64;
        let mut reached_eof = false;

        while read_total < self.max_scan_bytes {
            if interrupted() {
                return None;
            }

            let want = (self.max_scan_bytes - read_total).min(self.chunk_size as u64) as usize;
            let n = match file.read(&mut buf[..want]) {
                Ok(0) => {
                    reached_eof = true;
                    break;
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("Read error in {:?} after {} bytes: {}", path, read_total, e);
                    return Some(Classification::error(format!("read failed: {}", e)));
                }
            };

            let chunk = &buf[..n];
            read_total += n as u64;
            hasher.update(chunk);
            entropy.update(chunk);

            window.extend_from_slice(chunk);
            if let Some(name) = self.store.matches(&window) {
                return Some(Classification::infected(name, read_total));
            }
            if window.len() > overlap {
                let excess = window.len() - overlap;
                window.drain(..excess);
            }
        }

        if !reached_eof {
            // Hit the read bound exactly at EOF?
            reached_eof = matches!(file.read(&mut buf[..1]), Ok(0));
        }

        if reached_eof && self.store.has_hash_signatures() {
            let digest = hex::encode(hasher.finalize());
            if let Some(name) = self.store.matches_sha256(&digest) {
                return Some(Classification::infected(name, read_total));
            }
        }

        if self.heuristics.enabled {
            if let Some(threat) = self.heuristic_threat(path, &entropy) {
                return Some(Classification::warning(threat, read_total));
            }
        }

        Some(Classification::clean(read_total))
    }

    fn heuristic_threat(&self, path: &Path, entropy: &EntropyAccumulator) -> Option<&'static str> {
        let name = path.file_name()?.to_string_lossy().to_lowercase();
        let parts: Vec<&str> = name.split('.').collect();
        let ext = *parts.last()?;
        if parts.len() < 2 || !self.heuristics.is_executable(ext) {
            return None;
        }

        if parts.len() >= 3 && DECOY_EXTENSIONS.contains(&parts[parts.len() - 2]) {
            return Some(DOUBLE_EXTENSION);
        }

        if entropy.is_significant() && entropy.entropy() >= self.heuristics.entropy_threshold {
            return Some(PACKED_EXECUTABLE);
        }

        None
    }
}

impl Classifier for FileClassifier {
    fn classify(
        &self,
        record: &FileRecord,
        interrupted: &dyn Fn() -> bool,
    ) -> Option<Classification> {
        self.classify_path(&record.path, interrupted)
    }
}
