//! Services module - the per-line ingestion and forwarding engine.
//!
//! Everything here is independent of how the bridge is launched or observed;
//! the orchestrator and the binary only wire these pieces together.
//!
//! # Components
//!
//! - [`decoder`]: result file -> [`InspectionRecord`](crate::models::InspectionRecord)
//!   (filename tokens for CSV, mapped element paths for XML)
//! - [`codec`]: the `uploadData` wire message and acknowledgement handling
//! - [`connection`]: one persistent socket per line with bounded exponential
//!   backoff, generic over a [`Dialer`]
//! - [`discovery`] / [`disposal`]: finding candidate files and moving or
//!   deleting them after delivery
//! - [`health`]: the Unknown / OK / Standby / Error / File issue state machine
//! - [`worker`]: the polling loop tying it all together
//!
//! # Flow of one file
//!
//! ```text
//! discover -> decode -> encode -> send (reconnect + retry once) -> dispose -> advance counter
//! ```
//!
//! A failed send leaves the file where it is; the next tick picks it up again.

pub mod codec;
pub mod connection;
pub mod decoder;
pub mod discovery;
pub mod disposal;
pub mod health;
pub mod stop;
pub mod worker;

pub use codec::{Ack, UploadMessage};
pub use connection::{ConnectError, ConnectionManager, Dialer, ExchangeError, TcpDialer};
pub use decoder::{CsvFilenameDecoder, DecodeError, LineDecoder, XmlFieldExtractor};
pub use disposal::DisposalError;
pub use health::{HealthMonitor, HealthState};
pub use stop::StopSignal;
pub use worker::{LineWorker, SendError, SequenceCounter, TickSummary};
