// Inspection Bridge - forwards inspection-station result files to an MES receiver
//
// This is the library crate containing the forwarding engine and its data structures.
// The binary crate (main.rs) provides the command-line entry point.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{ConfigError, ConfigManager};
pub use models::{BridgeConfig, FileType, InspectionRecord, LineConfig, SerialState};
pub use orchestrator::{Orchestrator, StopReport};
pub use services::{HealthState, LineWorker, SequenceCounter};
pub use state::{LineEvent, LineEvents, StatusBoard};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
