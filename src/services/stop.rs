//! Cooperative stop signal for line workers.
//!
//! Workers never get aborted. They poll [`StopSignal::is_stopped`] between
//! files and race every sleep against it, so a stop request takes effect at
//! the next file boundary or immediately during a sleep.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cooperative stop flag shared by the fleet.
///
/// Wraps the receiving side of the orchestrator's `watch` channel. Workers
/// check it between files and race every sleep against it.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for signals created by [`StopSignal::never`]
    _owner: Option<Arc<watch::Sender<bool>>>,
}

impl StopSignal {
    pub fn new(rx: watch::Receiver<bool>) -> Self {
        Self { rx, _owner: None }
    }

    /// A signal that is never raised, for one-off use outside the fleet
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _owner: Some(Arc::new(tx)),
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` if the sleep was cut short by a stop request.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        if self.is_stopped() {
            return true;
        }

        let deadline = tokio::time::Instant::now() + duration;
        let rx = &mut self.rx;

        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => false,
            // The borrow guard from `wait_for` must not live across an await
            stopped = async { rx.wait_for(|stopped| *stopped).await.is_ok() } => {
                if !stopped {
                    // Sender gone: nobody can stop us any more
                    tokio::time::sleep_until(deadline).await;
                }
                stopped
            }
        }
    }
}
