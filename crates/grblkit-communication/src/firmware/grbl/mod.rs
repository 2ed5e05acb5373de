//! GRBL firmware support
//!
//! - `response_parser` / `status_parser`: line classification and status reports
//! - `decoder`: applies parsed lines to the shared controller state
//! - `job`: program streaming bookkeeping
//! - `controller`: the `ControllerTrait` implementation
//! - `realtime`: single-byte commands
//! - `utils`: command formatting and setting names

pub mod controller;
pub mod decoder;
pub mod job;
pub mod realtime;
pub mod response_parser;
pub mod status_parser;
pub mod utils;

pub use controller::{ControllerConfig, GrblController};
pub use decoder::ResponseDecoder;
pub use job::JobStreamer;
pub use realtime::{OverrideAdjustment, RealtimeCommand};
pub use response_parser::{parse_response, GrblResponse};
pub use status_parser::{BufferState, StatusReport};

use thiserror::Error;

/// A line that could not be decoded
///
/// Decode failures are logged by the decoder and never reach callers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// Status report named a state outside the known set
    #[error("Unknown machine state '{0}'")]
    UnknownState(String),

    /// `error:<n>` outside the known set
    #[error("Unknown error code {0}")]
    UnknownErrorCode(u8),

    /// `ALARM:<n>` outside the known set
    #[error("Unknown alarm code {0}")]
    UnknownAlarmCode(u8),

    /// A status field had a malformed value
    #[error("Malformed status field {field}:{value}")]
    BadField {
        /// Field key.
        field: String,
        /// Raw value.
        value: String,
    },

    /// Line matched no known response form
    #[error("Unrecognized response '{0}'")]
    Unrecognized(String),
}
