//! Data models for the inspection bridge.
//!
//! - [`BridgeConfig`]: the on-disk configuration schema (`inspection-bridge.yaml`)
//! - [`LineConfig`]: immutable, resolved settings for one monitored line
//! - [`InspectionRecord`]: one decoded result file
//! - [`SerialState`]: the `serialNrState` wire value (0 = pass, 1 = fail)
//! - [`LineStatus`]: what observers know about a line
//!
//! Models are plain data. Behaviour lives in [`crate::services`].

pub mod config;
pub mod line;
pub mod record;
pub mod status;

pub use config::{
    BridgeConfig, LineSettings, MachineStateSettings, PassConditions, ServerSettings,
    SourceSettings,
};
pub use line::{ConnectPolicy, DecodeRules, DisposalMode, FileType, HealthThresholds, LineConfig};
pub use record::{InspectionRecord, SerialState};
pub use status::LineStatus;
