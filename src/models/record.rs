use camino::Utf8PathBuf;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Wire value of the `serialNrState` field.
///
/// The receiver treats `0` as "no defect" and `1` as "defect", so a passing
/// board is encoded as `0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerialState {
    Pass,
    Fail,
}

impl SerialState {
    /// Classify a result token against the line's pass set
    pub fn from_token(token: &str, pass_tokens: &HashSet<String>) -> Self {
        if pass_tokens.contains(token) {
            SerialState::Pass
        } else {
            SerialState::Fail
        }
    }

    pub fn code(self) -> u8 {
        match self {
            SerialState::Pass => 0,
            SerialState::Fail => 1,
        }
    }
}

/// A decoded result file, ready to be encoded and forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectionRecord {
    pub serial_number: String,
    pub result_token: String,
    pub state: SerialState,
    /// Event id carried by the file itself (XML); CSV lines use their own counter
    pub event_id: Option<String>,
    /// Extra mapped XML fields, kept for logging
    pub extras: IndexMap<String, String>,
    pub source_path: Utf8PathBuf,
}

impl InspectionRecord {
    pub fn result_passed(&self) -> bool {
        self.state == SerialState::Pass
    }
}
