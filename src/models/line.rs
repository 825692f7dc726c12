use camino::Utf8PathBuf;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Result-file convention written by a station
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    /// `{serial}_{datetimeTag}_{resultToken}.csv` in a flat directory
    Csv,
    /// Structured documents anywhere below the line's root directory
    Xml,
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileType::Csv => f.write_str("CSV"),
            FileType::Xml => f.write_str("XML"),
        }
    }
}

/// What happens to a source file once its record has been delivered
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisposalMode {
    #[default]
    Move,
    Delete,
}

/// Dial and exchange limits for one line's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectPolicy {
    /// Dial attempts per `ensure_connected` call
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Upper bound on waiting for an acknowledgement
    pub read_timeout: Duration,
}

impl Default for ConnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Time limits used by the health state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthThresholds {
    pub standby: Duration,
    pub unknown: Duration,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            standby: Duration::from_secs(600),
            unknown: Duration::from_secs(1800),
        }
    }
}

/// Decode rules of a line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodeRules {
    /// Result tokens that mean "no defect"
    pub pass_tokens: HashSet<String>,
    /// XML only: logical field -> element path
    pub xml_mapping: IndexMap<String, String>,
}

/// Immutable settings for a single monitored line.
///
/// Built once by [`crate::config::resolve_lines`] and moved into
/// the line's worker; nothing mutates it afterwards.
#[derive(Debug, Clone)]
pub struct LineConfig {
    /// Display name used in logs and health events
    pub name: String,
    pub file_type: FileType,
    /// Flat directory (CSV) or recursively scanned root (XML)
    pub source_dir: Utf8PathBuf,
    pub target_dir: Utf8PathBuf,
    pub disposal: DisposalMode,
    pub host: String,
    pub port: u16,
    pub poll_interval: Duration,
    pub rules: DecodeRules,
    pub connect: ConnectPolicy,
    pub health: HealthThresholds,
    pub log_activity: bool,
}

impl LineConfig {
    /// `host:port` of this line's receiver
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
