//! Per-line polling loop.
//!
//! A [`LineWorker`] owns everything one line needs: its immutable
//! [`LineConfig`], decoder, connection, sequence counter and health monitor.
//! None of it is shared. Observers learn about the line only through the
//! [`LineEvent`]s it emits.
//!
//! Each tick:
//! 1. re-evaluate health and publish it
//! 2. discover candidates (off the async runtime)
//! 3. decode, encode, deliver (reconnect and retry once on failure)
//! 4. dispose of delivered files and advance the CSV counter
//!
//! The stop signal is checked before every file and races the poll sleep.

use crate::logging::ActivityLog;
use crate::metrics::LineMetrics;
use crate::models::{FileType, InspectionRecord, LineConfig};
use crate::services::codec::{Ack, UploadMessage};
use crate::services::connection::{ConnectError, ConnectionManager, Dialer, ExchangeError};
use crate::services::decoder::LineDecoder;
use crate::services::discovery::discover;
use crate::services::disposal::{dispose, disposal_target};
use crate::services::health::{HealthMonitor, HealthState};
use crate::services::stop::StopSignal;
use crate::state::{LineEvent, LineEvents};
use camino::{Utf8Path, Utf8PathBuf};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Highest event id before the counter wraps back to 1
pub const SEQUENCE_MAX: u32 = 9999;

/// Event id source for CSV lines: 1..=9999, wrapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceCounter {
    value: u32,
}

impl SequenceCounter {
    pub fn new() -> Self {
        Self { value: 1 }
    }

    /// Resume from a known id; out-of-range values are folded into 1..=9999
    pub fn starting_at(value: u32) -> Self {
        let value = if value == 0 {
            1
        } else {
            (value - 1) % SEQUENCE_MAX + 1
        };
        Self { value }
    }

    /// The id the next message will carry
    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn advance(&mut self) {
        self.value = self.value % SEQUENCE_MAX + 1;
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a record could not be delivered this tick
#[derive(Error, Debug)]
pub enum SendError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Exchange(#[from] ExchangeError),
}

/// What happened to one candidate file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOutcome {
    Forwarded,
    /// Delivered, but the source file is still in place
    ForwardedNotDisposed,
    SendFailed,
    /// The receiver could not be reached at all; the rest of the batch waits
    Unreachable,
    Skipped,
    Interrupted,
}

/// Counts for one poll tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub candidates: usize,
    pub forwarded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub disposal_failures: usize,
    pub interrupted: bool,
}

impl TickSummary {
    fn add(&mut self, outcome: FileOutcome) {
        match outcome {
            FileOutcome::Forwarded => self.forwarded += 1,
            FileOutcome::ForwardedNotDisposed => {
                self.forwarded += 1;
                self.disposal_failures += 1;
            }
            FileOutcome::SendFailed | FileOutcome::Unreachable => self.failed += 1,
            FileOutcome::Skipped => self.skipped += 1,
            FileOutcome::Interrupted => self.interrupted = true,
        }
    }
}

fn now() -> Instant {
    // Follows tokio's clock so paused-time tests drive health thresholds
    tokio::time::Instant::now().into_std()
}

pub struct LineWorker<D: Dialer> {
    config: LineConfig,
    decoder: LineDecoder,
    connection: ConnectionManager<D>,
    counter: SequenceCounter,
    health: HealthMonitor,
    events: LineEvents,
    metrics: Arc<LineMetrics>,
    activity: ActivityLog,
    stop: StopSignal,
    /// Successful dials so far; every one after the first is a reconnect
    connects: u64,
    connected: bool,
}

impl<D: Dialer> LineWorker<D> {
    pub fn new(config: LineConfig, dialer: D, events: LineEvents, stop: StopSignal) -> Self {
        let decoder = LineDecoder::for_line(&config);
        let connection = ConnectionManager::new(dialer, config.endpoint(), config.connect);
        let health = HealthMonitor::new(config.health, now());

        Self {
            config,
            decoder,
            connection,
            counter: SequenceCounter::new(),
            health,
            events,
            metrics: Arc::new(LineMetrics::new()),
            activity: ActivityLog::disabled(),
            stop,
            connects: 0,
            connected: false,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<LineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach the shared activity log; ignored when the line has it turned off
    pub fn with_activity(mut self, activity: ActivityLog) -> Self {
        if self.config.log_activity {
            self.activity = activity;
        }
        self
    }

    pub fn with_counter(mut self, counter: SequenceCounter) -> Self {
        self.counter = counter;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn counter(&self) -> SequenceCounter {
        self.counter
    }

    pub fn health(&self) -> HealthState {
        self.health.state()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Poll until the stop signal is raised, then close the connection
    pub async fn run(&mut self) {
        if self.config.file_type == FileType::Csv && !self.config.source_dir.exists() {
            if let Err(e) = tokio::fs::create_dir_all(&self.config.source_dir).await {
                tracing::warn!(
                    "{}: cannot create source directory {}: {}",
                    self.config.name,
                    self.config.source_dir,
                    e
                );
            }
        }

        tracing::info!(
            "{}: monitoring {} ({}) for {}",
            self.config.name,
            self.config.source_dir,
            self.config.file_type,
            self.config.endpoint()
        );
        self.events.emit(LineEvent::Started {
            line: self.config.name.clone(),
            file_type: self.config.file_type,
            endpoint: self.config.endpoint(),
        });

        while !self.stop.is_stopped() {
            let summary = self.tick().await;
            if summary.candidates > 0 {
                tracing::debug!("{}: tick {:?}", self.config.name, summary);
            }

            if self.stop.sleep(self.config.poll_interval).await {
                break;
            }
        }

        self.shutdown().await;
    }

    /// One pass over the source directory
    pub async fn tick(&mut self) -> TickSummary {
        let mut summary = TickSummary::default();

        self.health.tick(now());
        self.publish_health();

        let candidates = match self.discover_candidates().await {
            Some(candidates) => candidates,
            None => return summary,
        };
        summary.candidates = candidates.len();

        for path in candidates {
            if self.stop.is_stopped() {
                summary.interrupted = true;
                break;
            }

            let outcome = self.process_file(&path).await;
            summary.add(outcome);
            self.publish_health();

            if matches!(outcome, FileOutcome::Unreachable | FileOutcome::Interrupted) {
                break;
            }
        }

        summary
    }

    /// Directory listing runs on the blocking pool; the returned future owns
    /// everything it needs so the worker is not borrowed while it waits.
    fn discover_candidates(
        &self,
    ) -> impl Future<Output = Option<Vec<Utf8PathBuf>>> + Send + 'static {
        let name = self.config.name.clone();
        let file_type = self.config.file_type;
        let dir = self.config.source_dir.clone();

        async move {
            match tokio::task::spawn_blocking(move || discover(file_type, &dir)).await {
                Ok(Ok(files)) => Some(files),
                Ok(Err(e)) => {
                    tracing::warn!("{}: {:#}", name, e);
                    None
                }
                Err(e) => {
                    tracing::error!("{}: discovery task failed: {}", name, e);
                    None
                }
            }
        }
    }

    async fn process_file(&mut self, path: &Utf8Path) -> FileOutcome {
        let record = match self.decoder.decode(path).await {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!("{}: skipping {}: {}", self.config.name, path, e);
                self.metrics.record_decode_failure();
                if self.config.file_type == FileType::Xml {
                    self.health.record_file_issue();
                }
                self.events.emit(LineEvent::FileSkipped {
                    line: self.config.name.clone(),
                    file: path.to_string(),
                    reason: e.to_string(),
                });
                return FileOutcome::Skipped;
            }
        };

        let event_id = match &record.event_id {
            Some(id) => id.clone(),
            None => self.counter.value().to_string(),
        };
        let message = UploadMessage::new(&event_id, record.serial_number.clone(), record.state);
        self.log_record(&record, &event_id);

        let result = self.deliver(message.encode().as_bytes()).await;

        let reply = match &result {
            Ok((ack, _)) => ack.text(),
            Err(_) => "",
        };
        self.activity.record(&format!(
            "File: {}, Sent: {}, Response: {}, Connected: {}",
            path,
            message.body(),
            reply,
            self.connection.is_connected()
        ));

        match result {
            Ok((ack, exchange_time)) => {
                self.on_delivered(&record, &event_id, ack, exchange_time)
                    .await
            }
            Err(SendError::Connect(ConnectError::Stopped)) => FileOutcome::Interrupted,
            Err(e) => {
                tracing::error!(
                    "{}: failed to forward {} (event {}): {}",
                    self.config.name,
                    path,
                    event_id,
                    e
                );
                self.metrics.record_send_failure();
                self.health.record_send_failure();
                self.events.emit(LineEvent::SendFailed {
                    line: self.config.name.clone(),
                    file: path.to_string(),
                    reason: e.to_string(),
                });

                if matches!(e, SendError::Connect(_)) {
                    FileOutcome::Unreachable
                } else {
                    FileOutcome::SendFailed
                }
            }
        }
    }

    fn log_record(&self, record: &InspectionRecord, event_id: &str) {
        if record.extras.is_empty() {
            tracing::debug!(
                "{}: {} result {} -> event {}",
                self.config.name,
                record.serial_number,
                record.result_token,
                event_id
            );
        } else {
            tracing::debug!(
                "{}: {} result {} -> event {} {:?}",
                self.config.name,
                record.serial_number,
                record.result_token,
                event_id,
                record.extras
            );
        }
    }

    async fn on_delivered(
        &mut self,
        record: &InspectionRecord,
        event_id: &str,
        ack: Ack,
        exchange_time: Duration,
    ) -> FileOutcome {
        self.metrics.record_forwarded(exchange_time);
        if let Ack::Suspicious(text) = &ack {
            tracing::warn!(
                "{}: receiver replied {:?} to event {}",
                self.config.name,
                text,
                event_id
            );
        }

        let path = &record.source_path;
        let target = disposal_target(
            self.config.disposal,
            &self.config.source_dir,
            &self.config.target_dir,
            path,
        );
        let disposed = match dispose(path, target.as_deref()).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("{}: {}", self.config.name, e);
                self.metrics.record_disposal_failure();
                self.events.emit(LineEvent::DisposalFailed {
                    line: self.config.name.clone(),
                    file: path.to_string(),
                    reason: e.to_string(),
                });
                false
            }
        };

        if record.event_id.is_none() {
            self.counter.advance();
        }
        self.health.record_success(now());

        tracing::info!(
            "{}: forwarded {} (event {}), reply {:?}",
            self.config.name,
            record.serial_number,
            event_id,
            ack.text()
        );
        self.events.emit(LineEvent::Forwarded {
            line: self.config.name.clone(),
            event_id: event_id.to_string(),
            serial: record.serial_number.clone(),
            reply: ack.text().to_string(),
        });

        if disposed {
            FileOutcome::Forwarded
        } else {
            FileOutcome::ForwardedNotDisposed
        }
    }

    /// Send once; on failure reconnect and retry exactly one more time.
    ///
    /// Returns the reply with the round trip of the exchange that succeeded,
    /// connect time excluded.
    async fn deliver(&mut self, payload: &[u8]) -> Result<(Ack, Duration), SendError> {
        self.connect().await?;

        match self.exchange(payload).await {
            Ok(delivered) => Ok(delivered),
            Err(first) => {
                self.note_disconnected();
                tracing::warn!(
                    "{}: send failed ({}), reconnecting for one retry",
                    self.config.name,
                    first
                );

                self.connect().await?;
                let retried = self.exchange(payload).await;
                if retried.is_err() {
                    self.note_disconnected();
                }
                Ok(retried?)
            }
        }
    }

    async fn exchange(&mut self, payload: &[u8]) -> Result<(Ack, Duration), ExchangeError> {
        let started = Instant::now();
        let ack = self.connection.send_and_receive(payload).await?;
        Ok((ack, started.elapsed()))
    }

    async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.connection.is_connected() {
            return Ok(());
        }

        self.connection.ensure_connected(&mut self.stop).await?;

        if self.connects > 0 {
            self.metrics.record_reconnect();
        }
        self.connects += 1;
        self.connected = true;

        tracing::info!(
            "Connected [{}] <-- {}",
            self.connection.endpoint(),
            self.config.source_dir
        );
        self.events.emit(LineEvent::Connected {
            line: self.config.name.clone(),
            endpoint: self.connection.endpoint().to_string(),
        });
        Ok(())
    }

    fn note_disconnected(&mut self) {
        if self.connected && !self.connection.is_connected() {
            self.connected = false;
            tracing::info!("Disconnected [{}]", self.connection.endpoint());
            self.events.emit(LineEvent::Disconnected {
                line: self.config.name.clone(),
                endpoint: self.connection.endpoint().to_string(),
            });
        }
    }

    fn publish_health(&self) {
        self.events.emit(LineEvent::Health {
            line: self.config.name.clone(),
            state: self.health.state(),
            elapsed_secs: self.health.elapsed(now()).as_secs(),
        });
    }

    async fn shutdown(&mut self) {
        self.connection.close().await;
        self.note_disconnected();
        tracing::info!("{}: stopped", self.config.name);
        self.events.emit(LineEvent::Stopped {
            line: self.config.name.clone(),
        });
    }
}
