//! Machine health state machine.
//!
//! Health is derived from `(status, last_success_at, now)` only. The worker
//! writes outcomes (success, send failure, file issue); time does the rest.

use crate::models::HealthThresholds;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum HealthState {
    #[default]
    Unknown,
    Ok,
    Standby,
    Error,
    FileIssue,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            HealthState::Unknown => "Unknown",
            HealthState::Ok => "OK",
            HealthState::Standby => "Standby",
            HealthState::Error => "Error",
            HealthState::FileIssue => "File issue",
        };
        f.write_str(label)
    }
}

/// Re-derive a line's health.
///
/// `Error` and `FileIssue` are sticky until the worker records a new outcome.
/// Otherwise the time since the last successful send decides: past the
/// unknown threshold the line is `Unknown`; past the standby threshold a
/// healthy line idles into `Standby` (and stays there until `Unknown`).
pub fn evaluate(
    status: HealthState,
    last_success_at: Instant,
    now: Instant,
    thresholds: &HealthThresholds,
) -> HealthState {
    let elapsed = now.saturating_duration_since(last_success_at);

    match status {
        HealthState::Error => HealthState::Error,
        HealthState::FileIssue => HealthState::FileIssue,
        _ if elapsed > thresholds.unknown => HealthState::Unknown,
        HealthState::Ok | HealthState::Standby if elapsed > thresholds.standby => {
            HealthState::Standby
        }
        HealthState::Ok => HealthState::Ok,
        _ => HealthState::Unknown,
    }
}

/// Per-line health owned by that line's worker
#[derive(Debug, Clone)]
pub struct HealthMonitor {
    status: HealthState,
    last_success_at: Instant,
    thresholds: HealthThresholds,
}

impl HealthMonitor {
    /// Starts `Unknown`, with the success clock running from `now`
    pub fn new(thresholds: HealthThresholds, now: Instant) -> Self {
        Self {
            status: HealthState::Unknown,
            last_success_at: now,
            thresholds,
        }
    }

    pub fn state(&self) -> HealthState {
        self.status
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_success_at)
    }

    /// Time-based re-evaluation, run once per poll tick
    pub fn tick(&mut self, now: Instant) -> HealthState {
        self.status = evaluate(self.status, self.last_success_at, now, &self.thresholds);
        self.status
    }

    pub fn record_success(&mut self, now: Instant) {
        self.status = HealthState::Ok;
        self.last_success_at = now;
    }

    pub fn record_send_failure(&mut self) {
        self.status = HealthState::Error;
    }

    pub fn record_file_issue(&mut self) {
        self.status = HealthState::FileIssue;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(now: Instant, secs_ago: u64) -> Instant {
        now - Duration::from_secs(secs_ago)
    }

    fn later() -> Instant {
        Instant::now() + Duration::from_secs(10_000)
    }

    #[test]
    fn test_ok_goes_unknown_past_threshold() {
        let now = later();
        let thresholds = HealthThresholds::default();
        assert_eq!(
            evaluate(HealthState::Ok, at(now, 1801), now, &thresholds),
            HealthState::Unknown
        );
    }

    #[test]
    fn test_ok_goes_standby_past_threshold() {
        let now = later();
        let thresholds = HealthThresholds::default();
        assert_eq!(
            evaluate(HealthState::Ok, at(now, 601), now, &thresholds),
            HealthState::Standby
        );
        assert_eq!(
            evaluate(HealthState::Ok, at(now, 600), now, &thresholds),
            HealthState::Ok
        );
    }

    #[test]
    fn test_standby_holds_until_unknown() {
        let now = later();
        let thresholds = HealthThresholds::default();
        assert_eq!(
            evaluate(HealthState::Standby, at(now, 1200), now, &thresholds),
            HealthState::Standby
        );
        assert_eq!(
            evaluate(HealthState::Standby, at(now, 1801), now, &thresholds),
            HealthState::Unknown
        );
    }

    #[test]
    fn test_error_and_file_issue_are_sticky() {
        let now = later();
        let thresholds = HealthThresholds::default();
        for secs in [0, 601, 1801, 9000] {
            assert_eq!(
                evaluate(HealthState::Error, at(now, secs), now, &thresholds),
                HealthState::Error
            );
            assert_eq!(
                evaluate(HealthState::FileIssue, at(now, secs), now, &thresholds),
                HealthState::FileIssue
            );
        }
    }

    #[test]
    fn test_unknown_stays_unknown_without_success() {
        let now = later();
        let thresholds = HealthThresholds::default();
        assert_eq!(
            evaluate(HealthState::Unknown, at(now, 5), now, &thresholds),
            HealthState::Unknown
        );
    }

    #[test]
    fn test_monitor_outcomes() {
        let start = Instant::now();
        let mut monitor = HealthMonitor::new(HealthThresholds::default(), start);
        assert_eq!(monitor.tick(start), HealthState::Unknown);

        monitor.record_send_failure();
        assert_eq!(monitor.tick(start + Duration::from_secs(3)), HealthState::Error);

        monitor.record_success(start + Duration::from_secs(5));
        assert_eq!(monitor.tick(start + Duration::from_secs(6)), HealthState::Ok);
        assert_eq!(monitor.elapsed(start + Duration::from_secs(6)), Duration::from_secs(1));

        assert_eq!(
            monitor.tick(start + Duration::from_secs(5 + 700)),
            HealthState::Standby
        );

        monitor.record_file_issue();
        assert_eq!(
            monitor.tick(start + Duration::from_secs(5 + 5000)),
            HealthState::FileIssue
        );
    }
}
