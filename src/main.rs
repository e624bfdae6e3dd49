//! vigil: multi-threaded file scanning engine.
//!
//! This is the main entry point for the CLI application.

use anyhow::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::sync::broadcast::error::RecvError;
use vigil::core::config::Config;
use vigil::core::error::{Error, Result};
use vigil::core::types::ScanTarget;
use vigil::detection::{FileClassifier, SignatureRegistry};
use vigil::protocol::{serve, Event};
use vigil::quarantine::{EntryState, QuarantineManager, MANUAL_THREAT};
use vigil::ui::cli::{Cli, Commands, ConfigAction, OutputFormat, QuarantineAction, SignatureAction};
use vigil::utils::logging::{init_logging, LogConfig, LOG_FILE_NAME};
use vigil::Engine;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            if let Some(cause) = e.chain().find_map(|c| c.downcast_ref::<Error>()) {
                if let Some(hint) = cause.suggestion() {
                    eprintln!("Hint ({}): {}", cause.category(), hint);
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse_args();

    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("using config file {}", path.display()))?,
        None => Config::load_or_default(),
    };

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::from_config(&config)
    };
    init_logging(log_config)?;

    log::info!("vigil v{}", env!("CARGO_PKG_VERSION"));
    let config_path = cli.config.clone().unwrap_or_else(Config::default_config_path);

    match cli.command {
        Some(Commands::Serve { bind }) => run_serve(config, bind).await.context("serve"),
        Some(Commands::Scan {
            path,
            cpu_limit,
            no_recursive,
        }) => {
            let context = format!("scan of {}", path.display());
            run_scan(config, path, cpu_limit, !no_recursive)
                .await
                .context(context)
        }
        Some(Commands::Quarantine { action }) => {
            run_quarantine(&config, action, cli.format).context("quarantine")
        }
        Some(Commands::History { limit }) => {
            run_history(&config, limit, cli.format).context("history")
        }
        Some(Commands::Signatures { action }) => {
            run_signatures(&config, action, cli.format).context("signatures")
        }
        Some(Commands::Config { action }) => {
            run_config(action, &config, &config_path).context("config")
        }
        Some(Commands::Info) => run_info(&config, &config_path).context("info"),
        None => {
            println!("vigil - multi-threaded file scanning engine");
            println!();
            println!("Use --help for usage information");
            println!();
            println!("Quick start:");
            println!("  vigil serve               Start the control server");
            println!("  vigil scan <PATH>         Scan a directory, events on stdout");
            println!("  vigil quarantine list     View quarantined files");
            Ok(())
        }
    }
}

/// Run the control server until Ctrl-C.
async fn run_serve(config: Config, bind: Option<String>) -> Result<()> {
    let addr = bind.unwrap_or_else(|| config.server.bind_address.clone());
    let engine = Engine::open(config)?;

    tokio::select! {
        result = serve(engine.clone(), &addr) => result?,
        _ = tokio::signal::ctrl_c() => {
            log::info!("Shutting down");
        }
    }
    engine.shutdown().await
}

/// Run one scan headless. Events go to stdout as JSON lines.
async fn run_scan(config: Config, path: PathBuf, cpu_limit: u8, recursive: bool) -> Result<()> {
    let engine = Engine::open(config)?;
    let coordinator = engine.coordinator();
    let mut events = coordinator.subscribe();

    coordinator
        .start(ScanTarget::new(path, recursive, cpu_limit))
        .await?;

    let mut interrupted = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", event.to_line()?);
                    if let Event::Status(state) = &event {
                        if !state.scanning {
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("Output fell behind, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                log::info!("Interrupted, stopping scan");
                interrupted = true;
                coordinator.stop().await?;
            }
        }
    }

    let metrics = coordinator.metrics();
    log::info!(
        "{} files scanned, {} threats, {} errors",
        metrics.files_scanned,
        metrics.threats_detected,
        metrics.errors
    );
    engine.shutdown().await
}

/// Manage quarantine.
fn run_quarantine(config: &Config, action: QuarantineAction, format: OutputFormat) -> Result<()> {
    let (manager, report) = QuarantineManager::open(&config.quarantine)?;
    if report.changed() {
        log::info!(
            "Quarantine reconciled: {} adopted, {} stale entries dropped",
            report.adopted,
            report.dropped_stale
        );
    }

    match action {
        QuarantineAction::List => {
            let list = manager.list()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list)?),
                OutputFormat::Text if list.is_empty() => println!("Quarantine is empty."),
                OutputFormat::Text => {
                    for item in &list {
                        let state = match item.state {
                            EntryState::Ok => "",
                            EntryState::Orphaned => " [orphaned]",
                            EntryState::Lost => " [lost]",
                        };
                        println!("{}  {}  ({}){}", item.file, item.original, item.threat, state);
                    }
                }
            }
        }
        QuarantineAction::Add { path } => {
            let entry = manager.quarantine(&path, Some(MANUAL_THREAT))?;
            println!("Quarantined {} as {}", entry.original, entry.file);
        }
        QuarantineAction::Restore { filename } => {
            let restored = manager.restore(&filename)?;
            println!("Restored {}", restored.display());
        }
        QuarantineAction::RestoreAll => {
            let summary = manager.restore_all()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&summary)?),
                OutputFormat::Text => println!(
                    "Restored {} files, {} failed",
                    summary.restored, summary.failed
                ),
            }
        }
        QuarantineAction::Delete { filename } => {
            if manager.delete(&filename)? {
                println!("Deleted {}", filename);
            } else {
                println!("{} was not in quarantine", filename);
            }
        }
    }
    Ok(())
}

/// Show scan history.
fn run_history(config: &Config, limit: usize, format: OutputFormat) -> Result<()> {
    let store = vigil::scanner::HistoryStore::new(
        config.engine.history_path(),
        config.engine.history_limit,
    );
    let entries: Vec<_> = store.load().into_iter().take(limit).collect();

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&entries)?),
        OutputFormat::Text if entries.is_empty() => println!("No scans recorded."),
        OutputFormat::Text => {
            for entry in &entries {
                println!(
                    "{}  {:<9}  {:>7} files  {:>4} threats  {:>6} ms  {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    format!("{:?}", entry.status).to_lowercase(),
                    entry.files_scanned,
                    entry.threats_detected,
                    entry.duration_ms,
                    entry.path
                );
            }
        }
    }
    Ok(())
}

/// Inspect signatures.
fn run_signatures(config: &Config, action: SignatureAction, format: OutputFormat) -> Result<()> {
    let (registry, load_error) = SignatureRegistry::open(
        config.detection.signature_path(),
        config.detection.builtin_eicar,
    );
    if let Some(e) = load_error {
        return Err(e);
    }
    let store = registry.snapshot();

    match action {
        SignatureAction::List => {
            let lines = registry.raw_lines()?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&lines)?),
                OutputFormat::Text => {
                    println!("File:      {}", registry.path().display());
                    println!("Loaded:    {}", store.len());
                    for rejected in store.rejected() {
                        println!("Rejected:  line {}: {}", rejected.line, rejected.reason);
                    }
                    for line in &lines {
                        println!("  {}", line);
                    }
                }
            }
        }
        SignatureAction::Check { file } => {
            if !file.is_file() {
                return Err(Error::PathNotFound(file));
            }
            let classifier = FileClassifier::new(store, config);
            let classification = classifier
                .classify_path(&file, &|| false)
                .ok_or_else(|| Error::Internal("classification interrupted".to_string()))?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string(&classification)?),
                OutputFormat::Text => match &classification.threat {
                    Some(threat) => println!("{}: {} ({})", file.display(), classification.verdict, threat),
                    None => println!("{}: {}", file.display(), classification.verdict),
                },
            }
        }
    }
    Ok(())
}

/// Handle configuration commands.
fn run_config(action: ConfigAction, config: &Config, path: &std::path::Path) -> Result<()> {
    match action {
        ConfigAction::Show => {
            println!("{}", serde_json::to_string_pretty(config)?);
        }
        ConfigAction::Path => {
            println!("{}", path.display());
        }
        ConfigAction::Reset => {
            log::info!("Resetting configuration to defaults...");
            Config::default().save(path)?;
            println!("Configuration reset to defaults.");
        }
    }
    Ok(())
}

/// Show application information.
fn run_info(config: &Config, config_path: &std::path::Path) -> Result<()> {
    println!("vigil - multi-threaded file scanning engine");
    println!();
    println!("Version:          {}", env!("CARGO_PKG_VERSION"));
    println!("Config Path:      {}", config_path.display());
    println!("Data Directory:   {}", Config::data_dir().display());
    println!(
        "Log File:         {}",
        config.logging.log_dir().join(LOG_FILE_NAME).display()
    );
    println!("Signatures:       {}", config.detection.signature_path().display());
    println!("History:          {}", config.engine.history_path().display());
    println!("Quarantine Path:  {}", config.quarantine.quarantine_dir().display());
    println!();
    println!("Scan Settings:");
    println!("  Threads:        {}", config.scan.worker_threads);
    println!("  Queue Capacity: {}", config.scan.queue_capacity);
    println!("  Max Depth:      {}", config.scan.max_depth);
    println!();
    println!("Detection Settings:");
    println!("  Heuristics:     {}", config.detection.heuristics_enabled);
    println!("  Entropy Limit:  {}", config.detection.entropy_threshold);
    println!();
    println!("Server:           {}", config.server.bind_address);
    Ok(())
}
