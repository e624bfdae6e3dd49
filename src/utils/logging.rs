//! Logging setup for vigil.

use crate::core::config::Config;
use crate::core::error::{Error, Result};
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Log file created inside `logging.log_path`.
pub const LOG_FILE_NAME: &str = "vigil.log";

/// Logging configuration.
pub struct LogConfig {
    /// Log level
    pub level: LevelFilter,
    /// Show timestamps
    pub timestamps: bool,
    /// Show module path
    pub module_path: bool,
    /// Colour the level tag
    pub colors: bool,
    /// Also append every record to this file
    pub file_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            timestamps: true,
            module_path: false,
            colors: true,
            file_path: None,
        }
    }
}

impl LogConfig {
    /// Create a log config from application config.
    pub fn from_config(config: &Config) -> Self {
        let level = parse_level(&config.logging.log_level);
        let level = if config.logging.verbose_console {
            level.max(LevelFilter::Debug)
        } else {
            level
        };

        Self {
            level,
            timestamps: true,
            module_path: level >= LevelFilter::Debug,
            colors: true,
            file_path: Some(config.logging.log_dir().join(LOG_FILE_NAME)),
        }
    }

    /// Create a verbose log config for CLI.
    pub fn verbose() -> Self {
        Self {
            level: LevelFilter::Debug,
            timestamps: true,
            module_path: true,
            colors: true,
            file_path: None,
        }
    }

    /// Create a quiet log config (errors only).
    pub fn quiet() -> Self {
        Self {
            level: LevelFilter::Error,
            timestamps: false,
            module_path: false,
            colors: false,
            file_path: None,
        }
    }
}

fn parse_level(level: &str) -> LevelFilter {
    match level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" | "warning" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

/// Initialize the logging system.
///
/// Console output always goes to stderr so stdout stays free for JSON event
/// lines. With `file_path` set, each record is also appended to that file
/// without colour codes.
pub fn init_logging(config: LogConfig) -> Result<()> {
    let LogConfig {
        level,
        timestamps,
        module_path,
        colors,
        file_path,
    } = config;

    let mut builder = Builder::new();
    builder.filter_level(level);
    match &file_path {
        Some(path) => {
            let file = open_log_file(path)?;
            builder.target(Target::Pipe(Box::new(TeeWriter::new(file))));
        }
        None => {
            builder.target(Target::Stderr);
        }
    }

    builder.format(move |buf, record| {
        let mut output = String::new();

        if timestamps {
            output.push_str(&format!("{} ", Local::now().format("%Y-%m-%d %H:%M:%S")));
        }

        output.push_str(&format!("[{}] ", level_tag(record.level(), colors)));

        if module_path {
            if let Some(path) = record.module_path() {
                output.push_str(&format!("{}: ", path));
            }
        }

        output.push_str(&format!("{}", record.args()));

        writeln!(buf, "{}", output)
    });

    builder
        .try_init()
        .map_err(|e| Error::Internal(format!("Failed to initialize logger: {}", e)))?;

    log::debug!("Logging initialized with level: {:?}", level);
    if let Some(path) = file_path {
        log::debug!("Writing log file {:?}", path);
    }
    Ok(())
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::DirectoryAccess {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| Error::file_write(path, e))
}

/// Copies every record to stderr and, with ANSI escapes removed, to a file.
struct TeeWriter<W: Write> {
    file: W,
}

impl<W: Write> TeeWriter<W> {
    fn new(file: W) -> Self {
        Self { file }
    }
}

impl<W: Write> Write for TeeWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        // A full disk must not take console logging down with it.
        let _ = self.file.write_all(&strip_ansi(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.file.flush();
        io::stderr().flush()
    }
}

/// Remove `ESC [ ... m` colour sequences.
fn strip_ansi(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'[') {
            i += 2;
            while i < bytes.len() && bytes[i] != b'm' {
                i += 1;
            }
            i += 1;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn level_tag(level: log::Level, colors: bool) -> &'static str {
    match (level, colors) {
        (log::Level::Error, true) => "\x1b[31mERROR\x1b[0m",
        (log::Level::Warn, true) => "\x1b[33mWARN\x1b[0m ",
        (log::Level::Info, true) => "\x1b[32mINFO\x1b[0m ",
        (log::Level::Debug, true) => "\x1b[34mDEBUG\x1b[0m",
        (log::Level::Trace, true) => "\x1b[35mTRACE\x1b[0m",
        (log::Level::Error, false) => "ERROR",
        (log::Level::Warn, false) => "WARN ",
        (log::Level::Info, false) => "INFO ",
        (log::Level::Debug, false) => "DEBUG",
        (log::Level::Trace, false) => "TRACE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_config_default() {
        let config = LogConfig::default();
        assert_eq!(config.level, LevelFilter::Info);
        assert!(config.timestamps);
    }

    #[test]
    fn test_log_config_verbose() {
        let config = LogConfig::verbose();
        assert_eq!(config.level, LevelFilter::Debug);
        assert!(config.module_path);
    }

    #[test]
    fn test_log_config_quiet() {
        let config = LogConfig::quiet();
        assert_eq!(config.level, LevelFilter::Error);
        assert!(!config.timestamps);
    }

    #[test]
    fn test_from_config_writes_to_log_dir() {
        let mut config = Config::default();
        config.logging.log_path = Some(PathBuf::from("/var/log/vigil"));
        assert_eq!(
            LogConfig::from_config(&config).file_path,
            Some(PathBuf::from("/var/log/vigil").join(LOG_FILE_NAME))
        );
        assert!(LogConfig::verbose().file_path.is_none());
    }

    #[test]
    fn test_tee_strips_colours_for_file() {
        let mut tee = TeeWriter::new(Vec::new());
        let line = format!("[{}] hello\n", level_tag(log::Level::Warn, true));
        tee.write_all(line.as_bytes()).unwrap();
        assert_eq!(String::from_utf8(tee.file).unwrap(), "[WARN ] hello\n");
        assert_eq!(strip_ansi(b"plain"), b"plain");
    }

    #[test]
    fn test_open_log_file_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join(LOG_FILE_NAME);
        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "first").unwrap();
        drop(file);
        let mut file = open_log_file(&path).unwrap();
        writeln!(file, "second").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }

    #[test]
    fn test_from_config_levels() {
        let mut config = Config::default();
        config.logging.log_level = "WARN".to_string();
        assert_eq!(LogConfig::from_config(&config).level, LevelFilter::Warn);

        config.logging.verbose_console = true;
        assert_eq!(LogConfig::from_config(&config).level, LevelFilter::Debug);

        config.logging.log_level = "nonsense".to_string();
        config.logging.verbose_console = false;
        assert_eq!(LogConfig::from_config(&config).level, LevelFilter::Info);
    }
}
