//! `uploadData` wire message and acknowledgement handling.
//!
//! ```text
//! \x02uploadData;{eventId};-1;1;{serial};-1;{serialNrState};0;\r\n
//! ```
//!
//! All constant fields are placeholders the receiver expects verbatim.

use crate::models::SerialState;
use std::fmt;

pub const STX: char = '\u{02}';
pub const CRLF: &str = "\r\n";

/// One upload message, ready for the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadMessage {
    pub event_id: String,
    pub serial: String,
    pub state: SerialState,
}

impl UploadMessage {
    pub fn new(event_id: impl fmt::Display, serial: impl Into<String>, state: SerialState) -> Self {
        Self {
            event_id: event_id.to_string(),
            serial: serial.into(),
            state,
        }
    }

    /// Full frame including STX and CRLF
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// The frame without STX and CRLF, for logs
    pub fn body(&self) -> String {
        format!(
            "uploadData;{};-1;1;{};-1;{};0;",
            self.event_id,
            self.serial,
            self.state.code()
        )
    }
}

impl fmt::Display for UploadMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", STX, self.body(), CRLF)
    }
}

/// Classification of a receiver reply.
///
/// Delivery is decided solely by whether a non-empty reply arrived; the
/// variant only affects how the reply is logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Accepted(String),
    /// Non-empty, but looks like a rejection
    Suspicious(String),
}

impl Ack {
    /// Interpret raw reply bytes; `None` for an empty read (peer closed)
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.is_empty() {
            return None;
        }

        let text = String::from_utf8_lossy(bytes)
            .trim_matches(|c: char| c == STX || c.is_whitespace())
            .to_string();
        let lowered = text.to_ascii_lowercase();

        if lowered.contains("nack") || lowered.contains("error") || lowered.contains("fail") {
            Some(Ack::Suspicious(text))
        } else {
            Some(Ack::Accepted(text))
        }
    }

    pub fn text(&self) -> &str {
        match self {
            Ack::Accepted(text) | Ack::Suspicious(text) => text,
        }
    }
}
