//! Inspection Bridge - command-line entry point.
//!
//! # Overview
//!
//! Watches every configured line's result directory and forwards each
//! inspection result to the MES receiver as an `uploadData` message. It
//! initializes:
//! - Configuration loading ([`ConfigManager`], YAML + environment overrides)
//! - Logging infrastructure (daily rolling file + optional console)
//! - Tokio async runtime (one task per line)
//! - The fleet ([`Orchestrator`]) and a console observer for health changes
//!
//! # Execution Flow
//!
//! 1. Parse the command line; `--init` writes a template config and exits
//! 2. Load and validate the config (fatal on error, before anything starts)
//! 3. Initialize logging → `<log_dir>/inspection-bridge.<date>`
//! 4. Start one worker per line
//! 5. Wait for Ctrl-C
//! 6. Stop the fleet with a bounded timeout and log per-line metrics

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use inspection_bridge::config::{ConfigManager, DEFAULT_CONFIG_FILE};
use inspection_bridge::logging::{ActivityLog, FileActivityLog};
use inspection_bridge::state::spawn_console_reporter;
use inspection_bridge::{APP_NAME, Orchestrator, VERSION};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "inspection-bridge", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, env = "INSPECTION_BRIDGE_CONFIG")]
    config: Utf8PathBuf,

    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long)]
    debug: bool,

    /// Only log to file
    #[arg(long)]
    no_console: bool,

    /// Write a template configuration file and exit
    #[arg(long)]
    init: bool,

    /// Seconds to wait for workers to finish after Ctrl-C
    #[arg(long, default_value_t = 5)]
    stop_timeout_secs: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_manager = ConfigManager::new(&cli.config);

    if cli.init {
        config_manager.write_template()?;
        println!("Wrote template configuration to {}", cli.config);
        return Ok(());
    }

    // Configuration errors are the only fatal ones; report them before starting anything
    let config = config_manager.load()?;
    let lines = inspection_bridge::config::resolve_lines(&config)?;

    let log_dir = Utf8PathBuf::from(&config.source.log_dir);
    let _guard = inspection_bridge::logging::setup_logging(
        &log_dir,
        APP_NAME,
        cli.debug,
        !cli.no_console,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);
    tracing::info!(
        "Loaded {} lines from {}, receiver {}",
        lines.len(),
        config_manager.config_path(),
        config.server.address
    );

    // Held next to the diagnostics guard so pending activity lines are flushed on exit
    let (activity, _activity_guard) = if config.source.log_activity {
        let (sink, guard) = FileActivityLog::new(&log_dir)?;
        (ActivityLog::new(Arc::new(sink)), Some(guard))
    } else {
        (ActivityLog::disabled(), None)
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("bridge-worker")
        .build()
        .context("Failed to build tokio runtime")?;

    let stop_timeout = Duration::from_secs(cli.stop_timeout_secs);
    runtime.block_on(async move {
        let mut orchestrator = Orchestrator::new(lines, activity);
        let reporter = spawn_console_reporter(orchestrator.events());

        orchestrator.start();

        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        tracing::info!("Ctrl-C received, shutting down");

        let report = orchestrator.stop(stop_timeout).await;
        if !report.is_clean() {
            tracing::warn!(
                "Abandoned {} workers still busy: {}",
                report.abandoned.len(),
                report.abandoned.join(", ")
            );
        }

        for status in orchestrator.board().snapshot() {
            tracing::info!("{}", status.summary());
        }
        orchestrator.log_summary();

        drop(orchestrator);
        reporter.abort();
        Ok::<(), anyhow::Error>(())
    })?;

    // Abandoned workers are left to the runtime's own shutdown
    runtime.shutdown_timeout(Duration::from_secs(1));

    tracing::info!("Shutdown complete");
    Ok(())
}
