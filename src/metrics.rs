// Forwarding metrics
//
// One `LineMetrics` per line. Only that line's worker writes to it; the
// orchestrator keeps a handle to read and log the totals at shutdown.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Counters for a single line
///
/// Uses atomic operations so observers can read while the worker writes.
#[derive(Debug)]
pub struct LineMetrics {
    /// Records acknowledged by the receiver
    pub forwarded: AtomicU64,

    /// Records that failed even after the reconnect-and-retry
    pub send_failures: AtomicU64,

    /// Candidates skipped because they could not be decoded
    pub decode_failures: AtomicU64,

    /// Delivered records whose source file could not be moved or deleted
    pub disposal_failures: AtomicU64,

    /// Successful dials after the initial connect
    pub reconnects: AtomicU64,

    /// Total time spent in send/receive exchanges, in milliseconds
    pub total_exchange_time_ms: AtomicU64,

    start_time: Instant,
}

impl LineMetrics {
    pub fn new() -> Self {
        Self {
            forwarded: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            disposal_failures: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            total_exchange_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_forwarded(&self, exchange_time: Duration) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        self.total_exchange_time_ms
            .fetch_add(exchange_time.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn record_send_failure(&self) {
        self.send_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disposal_failure(&self) {
        self.disposal_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average exchange round trip per forwarded record in milliseconds
    pub fn avg_exchange_time_ms(&self) -> f64 {
        let total = self.total_exchange_time_ms.load(Ordering::Relaxed);
        let count = self.forwarded.load(Ordering::Relaxed);
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log this line's counters
    pub fn log_summary(&self, line: &str) {
        tracing::info!(
            "{}: {} forwarded (avg {:.1}ms), {} send failures, {} decode failures, {} disposal failures, {} reconnects, uptime {:.0}s",
            line,
            self.forwarded.load(Ordering::Relaxed),
            self.avg_exchange_time_ms(),
            self.send_failures.load(Ordering::Relaxed),
            self.decode_failures.load(Ordering::Relaxed),
            self.disposal_failures.load(Ordering::Relaxed),
            self.reconnects.load(Ordering::Relaxed),
            self.uptime().as_secs_f64()
        );
    }
}

impl Default for LineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = LineMetrics::new();
        assert_eq!(metrics.forwarded.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.send_failures.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_record_outcomes() {
        let metrics = LineMetrics::new();

        metrics.record_forwarded(Duration::from_millis(10));
        metrics.record_forwarded(Duration::from_millis(30));
        metrics.record_send_failure();
        metrics.record_decode_failure();
        metrics.record_disposal_failure();
        metrics.record_reconnect();

        assert_eq!(metrics.forwarded.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.send_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.decode_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.disposal_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.reconnects.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.avg_exchange_time_ms(), 20.0);
    }

    #[test]
    fn test_avg_without_records() {
        assert_eq!(LineMetrics::new().avg_exchange_time_ms(), 0.0);
    }
}
