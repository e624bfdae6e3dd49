//! Threat signatures and the line-oriented signature store.
//!
//! The signatures file holds one signature per line:
//!
//! ```text
//! # comment
//! evil-marker                  literal bytes
//! hex:4D5A9000                 bytes given as hex
//! sha256:<64 hex digits>       whole-file content hash
//! Trojan.Demo=evil-marker      any of the above with an explicit name
//! ```

use crate::core::error::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

/// EICAR standard antivirus test string.
pub const EICAR_STRING: &str =
    r"X5O!P%@AP[4\PZX54(P^)7CC)7}$EICAR-STANDARD-ANTIVIRUS-TEST-FILE!$H+H*";

/// Name reported for the built-in EICAR signature.
pub const EICAR_NAME: &str = "EICAR-Test-File";

const PREVIEW_LEN: usize = 24;

/// What a signature matches against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    /// Byte pattern found anywhere in the content
    Bytes(Vec<u8>),
    /// Lowercase hex SHA-256 of the whole content
    Sha256(String),
}

/// A named threat signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub name: String,
    pub kind: SignatureKind,
}

impl Signature {
    /// Create a byte-pattern signature.
    pub fn bytes(name: impl Into<String>, pattern: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            kind: SignatureKind::Bytes(pattern.into()),
        }
    }

    /// Create a content-hash signature.
    pub fn sha256(name: impl Into<String>, hash: impl AsRef<str>) -> Self {
        Self {
            name: name.into(),
            kind: SignatureKind::Sha256(hash.as_ref().to_lowercase()),
        }
    }

    /// The built-in EICAR test signature.
    pub fn eicar() -> Self {
        Self::bytes(EICAR_NAME, EICAR_STRING.as_bytes())
    }

    /// Parse one non-empty, non-comment line.
    pub fn parse_line(line: &str) -> std::result::Result<Self, String> {
        let line = line.trim();
        if line.is_empty() {
            return Err("empty pattern".to_string());
        }

        let (name, pattern) = match line.split_once('=') {
            Some((name, pattern)) if is_threat_name(name) => {
                (Some(name.trim().to_string()), pattern.trim())
            }
            _ => (None, line),
        };

        if pattern.is_empty() {
            return Err("empty pattern".to_string());
        }

        let default_name = || format!("Signature.{}", preview(pattern));

        if let Some(hex_part) = strip_prefix_ci(pattern, "sha256:") {
            let hash = hex_part.trim();
            if hash.len() != 64 || !hash.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err("sha256 signature must be 64 hex digits".to_string());
            }
            return Ok(Self::sha256(name.unwrap_or_else(default_name), hash));
        }

        if let Some(hex_part) = strip_prefix_ci(pattern, "hex:") {
            let compact: String = hex_part.split_whitespace().collect();
            let bytes = hex::decode(&compact).map_err(|e| format!("invalid hex: {}", e))?;
            if bytes.is_empty() {
                return Err("empty pattern".to_string());
            }
            return Ok(Self::bytes(name.unwrap_or_else(default_name), bytes));
        }

        Ok(Self::bytes(
            name.unwrap_or_else(default_name),
            pattern.as_bytes().to_vec(),
        ))
    }
}

/// Names look like `Family.Variant`: no spaces, at least one letter.
fn is_threat_name(candidate: &str) -> bool {
    let candidate = candidate.trim();
    !candidate.is_empty()
        && candidate.chars().any(|c| c.is_ascii_alphabetic())
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '/'))
        && !candidate.eq_ignore_ascii_case("hex")
        && !candidate.eq_ignore_ascii_case("sha256")
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

fn preview(pattern: &str) -> String {
    pattern.chars().take(PREVIEW_LEN).collect()
}

/// A line the loader could not use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    pub line: usize,
    pub reason: String,
}

/// Immutable set of signatures with a match predicate.
#[derive(Debug, Default)]
pub struct SignatureStore {
    patterns: Vec<(Vec<u8>, String)>,
    hashes: HashMap<String, String>,
    max_pattern_len: usize,
    rejected: Vec<RejectedLine>,
}

impl SignatureStore {
    /// Build a store from signatures. Duplicates collapse.
    pub fn from_signatures(signatures: impl IntoIterator<Item = Signature>) -> Self {
        let mut store = Self::default();
        for sig in signatures {
            store.insert(sig);
        }
        store
    }

    fn insert(&mut self, sig: Signature) {
        match sig.kind {
            SignatureKind::Bytes(bytes) => {
                if self.patterns.iter().any(|(p, _)| *p == bytes) {
                    return;
                }
                self.max_pattern_len = self.max_pattern_len.max(bytes.len());
                self.patterns.push((bytes, sig.name));
            }
            SignatureKind::Sha256(hash) => {
                self.hashes.entry(hash).or_insert(sig.name);
            }
        }
    }

    /// Parse signature text. Bad lines are skipped and recorded.
    pub fn parse(text: &str) -> Self {
        let mut store = Self::default();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match Signature::parse_line(line) {
                Ok(sig) => store.insert(sig),
                Err(reason) => {
                    log::warn!("Skipping signature line {}: {}", idx + 1, reason);
                    store.rejected.push(RejectedLine {
                        line: idx + 1,
                        reason,
                    });
                }
            }
        }
        store
    }

    /// Load signatures from a file.
    ///
    /// A missing file is an empty store. An unreadable or non-UTF-8 file is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("No signature file at {:?}, starting empty", path);
            return Ok(Self::default());
        }

        let bytes = std::fs::read(path).map_err(|e| Error::file_read(path, e))?;
        let text = String::from_utf8(bytes).map_err(|e| {
            Error::SignatureLoad(format!("{} is not valid UTF-8: {}", path.display(), e))
        })?;

        let store = Self::parse(&text);
        log::info!(
            "Loaded {} signatures from {:?} ({} rejected)",
            store.len(),
            path,
            store.rejected.len()
        );
        Ok(store)
    }

    /// Load like [`SignatureStore::load`] but never fail: errors yield an empty store.
    pub fn load_or_empty(path: &Path) -> (Self, Option<Error>) {
        match Self::load(path) {
            Ok(store) => (store, None),
            Err(e) => {
                log::error!("Signature load failed, continuing without signatures: {}", e);
                (Self::default(), Some(e))
            }
        }
    }

    /// Return a copy of this store with extra signatures added.
    pub fn with(mut self, extra: impl IntoIterator<Item = Signature>) -> Self {
        for sig in extra {
            self.insert(sig);
        }
        self
    }

    /// First threat whose byte pattern occurs in `bytes`.
    pub fn matches(&self, bytes: &[u8]) -> Option<&str> {
        self.patterns
            .iter()
            .find(|(pattern, _)| contains(bytes, pattern))
            .map(|(_, name)| name.as_str())
    }

    /// Threat whose content hash equals `sha256_hex`.
    pub fn matches_sha256(&self, sha256_hex: &str) -> Option<&str> {
        self.hashes
            .get(&sha256_hex.to_lowercase())
            .map(|s| s.as_str())
    }

    /// Longest byte pattern, used to size the chunk overlap window.
    pub fn max_pattern_len(&self) -> usize {
        self.max_pattern_len
    }

    pub fn has_hash_signatures(&self) -> bool {
        !self.hashes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len() + self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rejected(&self) -> &[RejectedLine] {
        &self.rejected
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || needle.len() > haystack.len() {
        return false;
    }
    let first = needle[0];
    haystack
        .windows(needle.len())
        .any(|w| w[0] == first && w == needle)
}

/// Holds the current signature snapshot.
///
/// Scans take an `Arc` at start; a reload swaps in a new store and never
/// touches the one a running scan holds.
pub struct SignatureRegistry {
    path: std::path::PathBuf,
    builtin_eicar: bool,
    current: RwLock<Arc<SignatureStore>>,
}

impl SignatureRegistry {
    /// Open the registry and perform the initial load.
    pub fn open(path: impl Into<std::path::PathBuf>, builtin_eicar: bool) -> (Self, Option<Error>) {
        let registry = Self {
            path: path.into(),
            builtin_eicar,
            current: RwLock::new(Arc::new(SignatureStore::default())),
        };
        let err = registry.reload().err();
        (registry, err)
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<SignatureStore> {
        Arc::clone(&*self.current.read())
    }

    /// Reload from disk. On failure the store becomes empty (plus built-ins).
    pub fn reload(&self) -> Result<usize> {
        let (store, err) = SignatureStore::load_or_empty(&self.path);
        let store = if self.builtin_eicar {
            store.with([Signature::eicar()])
        } else {
            store
        };
        let count = store.len();
        *self.current.write() = Arc::new(store);
        match err {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Raw non-empty lines of the signatures file.
    pub fn raw_lines(&self) -> Result<Vec<String>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let text = std::fs::read_to_string(&self.path).map_err(|e| Error::file_read(&self.path, e))?;
        Ok(text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Replace the signatures file and reload.
    pub fn save_lines(&self, lines: &[String]) -> Result<usize> {
        let mut contents = lines
            .iter()
            .map(|l| l.trim())
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        contents.push('\n');
        crate::utils::fs::write_atomic(&self.path, contents.as_bytes())?;
        self.reload()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
