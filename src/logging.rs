use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::io::Write;
use std::sync::Arc;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling::{self, RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// File name of the append-only activity log inside the log directory
pub const ACTIVITY_LOG_FILE: &str = "app_log.txt";

/// Setup diagnostic logging with a daily rotating file and optional console output.
///
/// `RUST_LOG` takes precedence over the `debug_mode` level when set.
///
/// # Arguments
/// * `log_dir` - Directory for log files (e.g., "logs")
/// * `log_prefix` - Prefix for log files (e.g., "inspection-bridge")
/// * `debug_mode` - If true, use debug level; otherwise use info level
/// * `console_output` - If true, also log to the console
///
/// # Returns
/// A guard that must be held for the duration of the program to keep logging active
pub fn setup_logging(
    log_dir: &Utf8Path,
    log_prefix: &str,
    debug_mode: bool,
    console_output: bool,
) -> Result<WorkerGuard> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)
            .with_context(|| format!("Failed to create log directory: {}", log_dir))?;
    }

    let file_appender = rolling::daily(log_dir, log_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if debug_mode { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    let console_layer = console_output.then(|| {
        tracing_subscriber::fmt::layer()
            .with_ansi(true)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::info!(
        "Logging initialized: dir={}, prefix={}, debug={}, console={}",
        log_dir,
        log_prefix,
        debug_mode,
        console_output
    );

    Ok(guard)
}

/// Destination for activity lines (one per forward attempt).
///
/// Implementations must tolerate concurrent calls from every line worker and
/// must never fail the caller: write errors are reported and swallowed.
#[cfg_attr(test, mockall::automock)]
pub trait ActivitySink: Send + Sync {
    fn append(&self, timestamp: &str, message: &str);
}

/// Append-only text file, `"{timestamp} - {message}"` per line.
///
/// Lines are handed to a dedicated writer thread, so workers never block on
/// disk I/O and lines from different workers never interleave. The returned
/// guard flushes pending lines when dropped.
#[derive(Debug)]
pub struct FileActivityLog {
    path: Utf8PathBuf,
    writer: NonBlocking,
}

impl FileActivityLog {
    pub fn new(log_dir: &Utf8Path) -> Result<(Self, WorkerGuard)> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(ACTIVITY_LOG_FILE)
            .build(log_dir)
            .with_context(|| format!("Failed to open activity log in {}", log_dir))?;

        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name("activity-log")
            .finish(appender);

        let log = Self {
            path: log_dir.join(ACTIVITY_LOG_FILE),
            writer,
        };
        Ok((log, guard))
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl ActivitySink for FileActivityLog {
    fn append(&self, timestamp: &str, message: &str) {
        let line = format!("{} - {}\n", timestamp, message);
        // One write per line keeps each line a single message on the writer thread
        if let Err(e) = self.writer.clone().write_all(line.as_bytes()) {
            tracing::warn!("Cannot write activity log {}: {}", self.path, e);
        }
    }
}

/// Handle workers use to record activity; a no-op when activity logging is off
#[derive(Clone, Default)]
pub struct ActivityLog {
    sink: Option<Arc<dyn ActivitySink>>,
}

impl ActivityLog {
    pub fn new(sink: Arc<dyn ActivitySink>) -> Self {
        Self { sink: Some(sink) }
    }

    pub fn disabled() -> Self {
        Self { sink: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sink.is_some()
    }

    /// Stamp `message` with the local time and append it
    pub fn record(&self, message: &str) {
        if let Some(sink) = &self.sink {
            let timestamp = chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.6f")
                .to_string();
            sink.append(&timestamp, message);
        }
    }
}

impl std::fmt::Debug for ActivityLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityLog")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn utf8(temp: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap()
    }

    #[test]
    fn test_activity_log_appends_lines() {
        let temp = TempDir::new().unwrap();
        let (log, guard) = FileActivityLog::new(&utf8(&temp).join("logs")).unwrap();

        log.append("2025-01-01 12:00:00", "first");
        log.append("2025-01-01 12:00:01", "second");
        drop(guard);

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(
            contents,
            "2025-01-01 12:00:00 - first\n2025-01-01 12:00:01 - second\n"
        );
    }

    #[test]
    fn test_activity_log_creates_directory() {
        let temp = TempDir::new().unwrap();
        let log_dir = utf8(&temp).join("nested").join("logs");

        let (log, _guard) = FileActivityLog::new(&log_dir).unwrap();

        assert!(log_dir.is_dir());
        assert_eq!(log.path(), log_dir.join(ACTIVITY_LOG_FILE));
    }

    #[test]
    fn test_concurrent_appends_do_not_interleave() {
        let temp = TempDir::new().unwrap();
        let (log, guard) = FileActivityLog::new(&utf8(&temp)).unwrap();
        let log = Arc::new(log);

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..50 {
                        log.append("ts", &format!("worker {} line {}", worker, i));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        drop(guard);

        let contents = fs::read_to_string(log.path()).unwrap();
        assert_eq!(contents.lines().count(), 200);
        assert!(contents.lines().all(|l| l.starts_with("ts - worker ")));
    }

    #[test]
    fn test_activity_log_records_through_sink() {
        let mut sink = MockActivitySink::new();
        sink.expect_append()
            .withf(|timestamp, message| !timestamp.is_empty() && message.starts_with("File: a.csv"))
            .times(1)
            .return_const(());

        let log = ActivityLog::new(Arc::new(sink));
        log.record("File: a.csv");
    }

    #[test]
    fn test_disabled_activity_log() {
        let log = ActivityLog::disabled();
        assert!(!log.is_enabled());
        log.record("ignored");
    }
}
