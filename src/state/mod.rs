// Line event bus and observer-side status board
//
// Workers never share state with each other or with observers. They emit
// `LineEvent`s into a broadcast channel; sending never blocks. Observers
// (console reporter, dashboards, the `StatusBoard`) subscribe and build their
// own view. A slow observer lags and loses events instead of stalling a line.

use crate::models::{FileType, LineStatus};
use crate::services::health::HealthState;
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Capacity of the event channel before slow subscribers start lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by line workers
#[derive(Clone, Debug, PartialEq)]
pub enum LineEvent {
    /// Worker started monitoring its source directory
    Started {
        line: String,
        file_type: FileType,
        endpoint: String,
    },

    /// Emitted on every poll tick and after every outcome
    Health {
        line: String,
        state: HealthState,
        elapsed_secs: u64,
    },

    Connected {
        line: String,
        endpoint: String,
    },

    Disconnected {
        line: String,
        endpoint: String,
    },

    /// A record was acknowledged by the receiver
    Forwarded {
        line: String,
        event_id: String,
        serial: String,
        reply: String,
    },

    /// A record could not be delivered; the file stays for the next tick
    SendFailed {
        line: String,
        file: String,
        reason: String,
    },

    /// A candidate could not be decoded and was left in place
    FileSkipped {
        line: String,
        file: String,
        reason: String,
    },

    /// Delivered, but the source file could not be moved or deleted
    DisposalFailed {
        line: String,
        file: String,
        reason: String,
    },

    Stopped {
        line: String,
    },
}

impl LineEvent {
    pub fn line(&self) -> &str {
        match self {
            LineEvent::Started { line, .. }
            | LineEvent::Health { line, .. }
            | LineEvent::Connected { line, .. }
            | LineEvent::Disconnected { line, .. }
            | LineEvent::Forwarded { line, .. }
            | LineEvent::SendFailed { line, .. }
            | LineEvent::FileSkipped { line, .. }
            | LineEvent::DisposalFailed { line, .. }
            | LineEvent::Stopped { line } => line,
        }
    }
}

/// Sending half of the event channel, cloned into every worker
#[derive(Clone, Debug)]
pub struct LineEvents {
    tx: broadcast::Sender<LineEvent>,
}

impl LineEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish without blocking; having no subscribers is fine
    pub fn emit(&self, event: LineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LineEvent> {
        self.tx.subscribe()
    }
}

impl Default for LineEvents {
    fn default() -> Self {
        Self::new()
    }
}

/// Latest known status of every line, folded from [`LineEvent`]s
///
/// # Usage
///
/// - [`register()`](Self::register) each line before its worker starts
/// - [`track()`](Self::track) spawns a task that applies events as they arrive
/// - [`snapshot()`](Self::snapshot) / [`read()`](Self::read) for observers
#[derive(Clone, Debug, Default)]
pub struct StatusBoard {
    lines: Arc<RwLock<IndexMap<String, LineStatus>>>,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, status: LineStatus) {
        let mut lines = self.lines.write().unwrap_or_else(|e| e.into_inner());
        lines.insert(status.name.clone(), status);
    }

    pub fn snapshot(&self) -> Vec<LineStatus> {
        let lines = self.lines.read().unwrap_or_else(|e| e.into_inner());
        lines.values().cloned().collect()
    }

    /// Execute a function with read access to one line's status
    pub fn read<F, R>(&self, line: &str, f: F) -> Option<R>
    where
        F: FnOnce(&LineStatus) -> R,
    {
        let lines = self.lines.read().unwrap_or_else(|e| e.into_inner());
        lines.get(line).map(f)
    }

    /// Fold one event into the board. Events for unregistered lines are ignored.
    pub fn apply(&self, event: &LineEvent) {
        let mut lines = self.lines.write().unwrap_or_else(|e| e.into_inner());
        let Some(status) = lines.get_mut(event.line()) else {
            return;
        };

        match event {
            LineEvent::Started { .. } => status.running = true,
            LineEvent::Health {
                state,
                elapsed_secs,
                ..
            } => {
                status.health = *state;
                status.elapsed_secs = *elapsed_secs;
            }
            LineEvent::Connected { .. } => status.connected = true,
            LineEvent::Disconnected { .. } => status.connected = false,
            LineEvent::Forwarded {
                event_id, serial, ..
            } => {
                status.forwarded += 1;
                status.last_event_id = Some(event_id.clone());
                status.last_serial = Some(serial.clone());
            }
            LineEvent::SendFailed { .. } => {
                status.failed += 1;
                status.connected = false;
            }
            LineEvent::FileSkipped { .. } => status.skipped += 1,
            LineEvent::DisposalFailed { .. } => {}
            LineEvent::Stopped { .. } => {
                status.running = false;
                status.connected = false;
            }
        }
    }

    /// Spawn a task that keeps this board current until the channel closes
    pub fn track(&self, mut rx: broadcast::Receiver<LineEvent>) -> JoinHandle<()> {
        let board = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => board.apply(&event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!("Status board lagged, {} events dropped", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Remembers each line's last health and reports only changes
#[derive(Debug, Default)]
pub struct HealthTransitions {
    last: HashMap<String, HealthState>,
}

impl HealthTransitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// `Some((previous, current))` when a health event changes the line's state.
    /// The first report for a line counts as a change from `Unknown`.
    pub fn observe(&mut self, event: &LineEvent) -> Option<(HealthState, HealthState)> {
        let LineEvent::Health { line, state, .. } = event else {
            return None;
        };

        let previous = self
            .last
            .insert(line.clone(), *state)
            .unwrap_or(HealthState::Unknown);
        (previous != *state).then_some((previous, *state))
    }
}

/// Spawn the console observer: logs health transitions and worker lifecycle
pub fn spawn_console_reporter(mut rx: broadcast::Receiver<LineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut transitions = HealthTransitions::new();
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some((from, to)) = transitions.observe(&event) {
                        if let LineEvent::Health {
                            line, elapsed_secs, ..
                        } = &event
                        {
                            tracing::info!(
                                "{}: {} -> {} ({} s since last success)",
                                line,
                                from,
                                to,
                                elapsed_secs
                            );
                        }
                    }
                    match &event {
                        LineEvent::FileSkipped { line, file, reason } => {
                            tracing::info!("{}: skipped {} ({})", line, file, reason);
                        }
                        LineEvent::Stopped { line } => tracing::info!("{}: worker exited", line),
                        _ => {}
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Console reporter lagged, {} events dropped", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn board_with_line() -> StatusBoard {
        let board = StatusBoard::new();
        board.register(LineStatus::new("SPI-1", FileType::Csv, "127.0.0.1:5001"));
        board
    }

    #[test]
    fn test_health_event_updates_board() {
        let board = board_with_line();
        board.apply(&LineEvent::Health {
            line: "SPI-1".to_string(),
            state: HealthState::Standby,
            elapsed_secs: 620,
        });

        let (health, elapsed) = board.read("SPI-1", |s| (s.health, s.elapsed_secs)).unwrap();
        assert_eq!(health, HealthState::Standby);
        assert_eq!(elapsed, 620);
    }

    #[test]
    fn test_forwarded_and_failed_counts() {
        let board = board_with_line();
        board.apply(&LineEvent::Connected {
            line: "SPI-1".to_string(),
            endpoint: "127.0.0.1:5001".to_string(),
        });
        board.apply(&LineEvent::Forwarded {
            line: "SPI-1".to_string(),
            event_id: "7".to_string(),
            serial: "ABC123".to_string(),
            reply: "ACK".to_string(),
        });
        board.apply(&LineEvent::SendFailed {
            line: "SPI-1".to_string(),
            file: "x.csv".to_string(),
            reason: "closed".to_string(),
        });

        let status = board.snapshot().remove(0);
        assert_eq!(status.forwarded, 1);
        assert_eq!(status.failed, 1);
        assert_eq!(status.last_event_id.as_deref(), Some("7"));
        assert!(!status.connected);
    }

    #[test]
    fn test_unknown_line_is_ignored() {
        let board = board_with_line();
        board.apply(&LineEvent::Stopped {
            line: "SPI-9".to_string(),
        });
        assert_eq!(board.snapshot().len(), 1);
        assert!(board.read("SPI-9", |s| s.running).is_none());
    }

    #[test]
    fn test_emit_without_subscribers() {
        let events = LineEvents::new();
        events.emit(LineEvent::Stopped {
            line: "SPI-1".to_string(),
        });
    }

    #[tokio::test]
    async fn test_tracker_applies_events() {
        let board = board_with_line();
        let events = LineEvents::new();
        let tracker = board.track(events.subscribe());

        events.emit(LineEvent::Started {
            line: "SPI-1".to_string(),
            file_type: FileType::Csv,
            endpoint: "127.0.0.1:5001".to_string(),
        });
        drop(events);
        tracker.await.unwrap();

        assert_eq!(board.read("SPI-1", |s| s.running), Some(true));
    }

    #[test]
    fn test_transitions_report_changes_only() {
        let mut transitions = HealthTransitions::new();
        let health = |state| LineEvent::Health {
            line: "SPI-1".to_string(),
            state,
            elapsed_secs: 0,
        };

        assert_eq!(transitions.observe(&health(HealthState::Unknown)), None);
        assert_eq!(
            transitions.observe(&health(HealthState::Ok)),
            Some((HealthState::Unknown, HealthState::Ok))
        );
        assert_eq!(transitions.observe(&health(HealthState::Ok)), None);
        assert_eq!(
            transitions.observe(&health(HealthState::Error)),
            Some((HealthState::Ok, HealthState::Error))
        );
        assert_eq!(
            transitions.observe(&LineEvent::Stopped {
                line: "SPI-1".to_string()
            }),
            None
        );
    }

    #[test]
    fn test_multiple_subscribers() {
        let events = LineEvents::new();
        let mut rx1 = events.subscribe();
        let mut rx2 = events.subscribe();

        events.emit(LineEvent::Stopped {
            line: "SPI-1".to_string(),
        });

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }
}
