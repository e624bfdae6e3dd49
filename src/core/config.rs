//! Configuration management for vigil.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Walker and worker settings
    pub scan: ScanConfig,
    /// Signature and heuristic settings
    pub detection: DetectionConfig,
    /// Coordinator settings
    pub engine: EngineConfig,
    /// Control server settings
    pub server: ServerConfig,
    /// Logging settings
    pub logging: LoggingConfig,
    /// Quarantine settings
    pub quarantine: QuarantineConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::ConfigLoad(format!("Failed to read config file: {}", e)))?;

        serde_json::from_str(&contents)
            .map_err(|e| Error::ConfigLoad(format!("Failed to parse config file: {}", e)))
    }

    /// Save configuration to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::ConfigSave(format!("Failed to create config directory: {}", e))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| Error::ConfigSave(format!("Failed to write config file: {}", e)))
    }

    /// Load configuration from default location, or create default if not exists.
    pub fn load_or_default() -> Self {
        let config_path = Self::default_config_path();

        if config_path.exists() {
            match Self::load(&config_path) {
                Ok(config) => return config,
                Err(e) => {
                    log::warn!("Failed to load config, using defaults: {}", e);
                }
            }
        }

        let config = Self::default();

        if let Err(e) = config.save(&config_path) {
            log::warn!("Failed to save default config: {}", e);
        }

        config
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        Self::data_dir().join("config.json")
    }

    /// Get the application data directory.
    pub fn data_dir() -> PathBuf {
        #[cfg(windows)]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("C:\\ProgramData"))
                .join("Vigil")
        }

        #[cfg(not(windows))]
        {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join("vigil")
        }
    }

    /// Place every persisted file under `dir` instead of the platform data directory.
    pub fn rooted_at(dir: &Path) -> Self {
        let mut config = Self::default();
        config.detection.signature_file = Some(dir.join("signatures.txt"));
        config.engine.history_file = Some(dir.join("history.json"));
        config.engine.settings_file = Some(dir.join("settings.json"));
        config.quarantine.vault_path = Some(dir.join("quarantine"));
        config.logging.log_path = Some(dir.join("logs"));
        config
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.scan.worker_threads == 0 || self.scan.worker_threads > 256 {
            return Err(Error::ConfigInvalid {
                field: "scan.worker_threads".to_string(),
                message: "Must be between 1 and 256".to_string(),
            });
        }

        if self.scan.queue_capacity == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.queue_capacity".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.scan.chunk_size < 512 {
            return Err(Error::ConfigInvalid {
                field: "scan.chunk_size".to_string(),
                message: "Must be at least 512 bytes".to_string(),
            });
        }

        if self.scan.max_scan_bytes == 0 {
            return Err(Error::ConfigInvalid {
                field: "scan.max_scan_bytes".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if !(0.0..=8.0).contains(&self.detection.entropy_threshold) {
            return Err(Error::ConfigInvalid {
                field: "detection.entropy_threshold".to_string(),
                message: "Must be between 0.0 and 8.0".to_string(),
            });
        }

        if self.engine.metrics_interval_ms < 50 {
            return Err(Error::ConfigInvalid {
                field: "engine.metrics_interval_ms".to_string(),
                message: "Must be at least 50".to_string(),
            });
        }

        if self.engine.history_limit == 0 {
            return Err(Error::ConfigInvalid {
                field: "engine.history_limit".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.quarantine.file_suffix.is_empty() || !self.quarantine.file_suffix.starts_with('.')
        {
            return Err(Error::ConfigInvalid {
                field: "quarantine.file_suffix".to_string(),
                message: "Must be a non-empty extension starting with '.'".to_string(),
            });
        }

        Ok(())
    }
}

/// Walker and worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Worker pool size at a 100% CPU budget
    pub worker_threads: usize,
    /// Capacity of the bounded walker -> worker queue
    pub queue_capacity: usize,
    /// Read chunk size in bytes
    pub chunk_size: usize,
    /// Maximum bytes read from any single file
    pub max_scan_bytes: u64,
    /// Follow symbolic links during traversal
    pub follow_symlinks: bool,
    /// Maximum directory depth for recursive scans
    pub max_depth: usize,
    /// Path fragments excluded from traversal
    pub exclude_paths: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            worker_threads: 8,
            queue_capacity: 256,
            chunk_size: 64 * 1024,
            max_scan_bytes: 32 * 1024 * 1024,
            follow_symlinks: false,
            max_depth: 64,
            exclude_paths: vec![
                "/proc".to_string(),
                "/sys".to_string(),
                "/dev".to_string(),
            ],
        }
    }
}

/// Detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Signature file (one pattern per line)
    pub signature_file: Option<PathBuf>,
    /// Always include the EICAR test signature
    pub builtin_eicar: bool,
    /// Enable entropy and extension heuristics
    pub heuristics_enabled: bool,
    /// Shannon entropy at or above which executables are flagged
    pub entropy_threshold: f64,
    /// Extensions treated as executable content
    pub executable_extensions: Vec<String>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            signature_file: None,
            builtin_eicar: true,
            heuristics_enabled: true,
            entropy_threshold: 7.5,
            executable_extensions: [
                "exe", "dll", "scr", "com", "bat", "cmd", "ps1", "vbs", "js", "jar", "msi", "sh",
                "elf", "bin",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl DetectionConfig {
    /// Get the effective signature file path.
    pub fn signature_path(&self) -> PathBuf {
        self.signature_file
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("signatures.txt"))
    }
}

/// Scan coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Metrics tick interval in milliseconds
    pub metrics_interval_ms: u64,
    /// Number of history entries kept
    pub history_limit: usize,
    /// Scan history file
    pub history_file: Option<PathBuf>,
    /// Opaque UI settings file
    pub settings_file: Option<PathBuf>,
    /// Capacity of the event broadcast buffer
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            metrics_interval_ms: 1000,
            history_limit: 50,
            history_file: None,
            settings_file: None,
            event_buffer: 1024,
        }
    }
}

impl EngineConfig {
    /// Get the effective history file path.
    pub fn history_path(&self) -> PathBuf {
        self.history_file
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("history.json"))
    }

    /// Get the effective settings file path.
    pub fn settings_path(&self) -> PathBuf {
        self.settings_file
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("settings.json"))
    }
}

/// Control server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the control server listens on
    pub bind_address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Path for log files
    pub log_path: Option<PathBuf>,
    /// Enable verbose console output
    pub verbose_console: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_path: None,
            verbose_console: false,
        }
    }
}

impl LoggingConfig {
    /// Get the effective log directory.
    pub fn log_dir(&self) -> PathBuf {
        self.log_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("logs"))
    }
}

/// Quarantine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuarantineConfig {
    /// Path for the quarantine directory
    pub vault_path: Option<PathBuf>,
    /// Suffix appended to quarantined files
    pub file_suffix: String,
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        Self {
            vault_path: None,
            file_suffix: ".locked".to_string(),
        }
    }
}

impl QuarantineConfig {
    /// Get the effective quarantine directory.
    pub fn quarantine_dir(&self) -> PathBuf {
        self.vault_path
            .clone()
            .unwrap_or_else(|| Config::data_dir().join("quarantine"))
    }
}
