use crate::models::FileType;
use crate::services::health::HealthState;
use serde::Serialize;

/// Observer-side view of one line.
///
/// Rebuilt from [`crate::state::LineEvent`]s by the
/// [`StatusBoard`](crate::state::StatusBoard); workers never touch it directly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineStatus {
    pub name: String,
    pub file_type: FileType,
    pub endpoint: String,
    pub health: HealthState,
    /// Seconds since the last successful send, as of the latest tick
    pub elapsed_secs: u64,
    pub connected: bool,
    pub last_event_id: Option<String>,
    pub last_serial: Option<String>,
    pub forwarded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub running: bool,
}

impl LineStatus {
    pub fn new(name: impl Into<String>, file_type: FileType, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file_type,
            endpoint: endpoint.into(),
            health: HealthState::Unknown,
            elapsed_secs: 0,
            connected: false,
            last_event_id: None,
            last_serial: None,
            forwarded: 0,
            failed: 0,
            skipped: 0,
            running: false,
        }
    }

    /// One-line summary for console output
    pub fn summary(&self) -> String {
        format!(
            "{} [{}] {} ({} s) - {} forwarded, {} failed, {} skipped",
            self.name,
            self.file_type,
            self.health,
            self.elapsed_secs,
            self.forwarded,
            self.failed,
            self.skipped
        )
    }
}
