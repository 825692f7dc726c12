//! Fleet supervisor.
//!
//! Spawns one [`LineWorker`] task per configured line and owns the process-wide
//! stop signal. Stopping is cooperative: workers finish their current file,
//! close their socket and exit. A worker that does not exit within the stop
//! timeout is abandoned, never aborted.

use crate::logging::ActivityLog;
use crate::metrics::LineMetrics;
use crate::models::{LineConfig, LineStatus};
use crate::services::connection::{Dialer, TcpDialer};
use crate::services::stop::StopSignal;
use crate::services::worker::LineWorker;
use crate::state::{LineEvent, LineEvents, StatusBoard};
use indexmap::IndexMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Outcome of [`Orchestrator::stop`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Lines whose worker exited in time
    pub stopped: Vec<String>,
    /// Lines whose worker was still busy when the timeout expired
    pub abandoned: Vec<String>,
}

impl StopReport {
    pub fn is_clean(&self) -> bool {
        self.abandoned.is_empty()
    }
}

pub struct Orchestrator<D = TcpDialer>
where
    D: Dialer + Clone + 'static,
{
    lines: Vec<LineConfig>,
    dialer: D,
    events: LineEvents,
    board: StatusBoard,
    stop_tx: watch::Sender<bool>,
    workers: Vec<(String, JoinHandle<()>)>,
    tracker: Option<JoinHandle<()>>,
    metrics: IndexMap<String, Arc<LineMetrics>>,
    activity: ActivityLog,
}

impl Orchestrator<TcpDialer> {
    pub fn new(lines: Vec<LineConfig>, activity: ActivityLog) -> Self {
        Self::with_dialer(lines, activity, TcpDialer)
    }
}

impl<D> Orchestrator<D>
where
    D: Dialer + Clone + 'static,
{
    pub fn with_dialer(lines: Vec<LineConfig>, activity: ActivityLog, dialer: D) -> Self {
        let (stop_tx, _) = watch::channel(false);
        let metrics = lines
            .iter()
            .map(|line| (line.name.clone(), Arc::new(LineMetrics::new())))
            .collect();

        Self {
            lines,
            dialer,
            events: LineEvents::new(),
            board: StatusBoard::new(),
            stop_tx,
            workers: Vec::new(),
            tracker: None,
            metrics,
            activity,
        }
    }

    pub fn lines(&self) -> &[LineConfig] {
        &self.lines
    }

    /// Subscribe to every line's events; lagging subscribers lose events
    pub fn events(&self) -> broadcast::Receiver<LineEvent> {
        self.events.subscribe()
    }

    pub fn board(&self) -> &StatusBoard {
        &self.board
    }

    pub fn metrics(&self, line: &str) -> Option<Arc<LineMetrics>> {
        self.metrics.get(line).cloned()
    }

    pub fn is_running(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawn one worker per line. Does nothing if the fleet is already running.
    pub fn start(&mut self) {
        if self.is_running() {
            tracing::warn!("Fleet already running");
            return;
        }

        self.stop_tx.send_replace(false);

        for line in &self.lines {
            self.board.register(LineStatus::new(
                line.name.clone(),
                line.file_type,
                line.endpoint(),
            ));
        }
        if self.tracker.is_none() {
            self.tracker = Some(self.board.track(self.events.subscribe()));
        }

        for line in &self.lines {
            let metrics = self
                .metrics
                .entry(line.name.clone())
                .or_insert_with(|| Arc::new(LineMetrics::new()))
                .clone();

            let mut worker = LineWorker::new(
                line.clone(),
                self.dialer.clone(),
                self.events.clone(),
                StopSignal::new(self.stop_tx.subscribe()),
            )
            .with_metrics(metrics)
            .with_activity(self.activity.clone());

            let handle = tokio::spawn(async move { worker.run().await });
            self.workers.push((line.name.clone(), handle));
        }

        tracing::info!("Started {} line workers", self.workers.len());
    }

    /// Raise the stop signal and wait up to `timeout` for all workers to exit
    pub async fn stop(&mut self, timeout: Duration) -> StopReport {
        let mut report = StopReport::default();
        if self.workers.is_empty() {
            return report;
        }

        tracing::info!("Stopping {} line workers", self.workers.len());
        self.stop_tx.send_replace(true);

        let deadline = tokio::time::Instant::now() + timeout;
        for (name, handle) in self.workers.drain(..) {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => report.stopped.push(name),
                Ok(Err(e)) => {
                    tracing::error!("{}: worker task failed: {}", name, e);
                    report.stopped.push(name);
                }
                Err(_) => {
                    tracing::warn!("{}: did not stop within {:?}, abandoning", name, timeout);
                    report.abandoned.push(name);
                }
            }
        }

        report
    }

    /// Log every line's counters
    pub fn log_summary(&self) {
        for (line, metrics) in &self.metrics {
            metrics.log_summary(line);
        }
    }
}
