//! Error handling for GrblKit
//!
//! Provides error types for every layer of the controller:
//! - Controller errors (preconditions, timeouts, alarms)
//! - Connection errors (serial port and handshake)
//!
//! All error types use `thiserror` for ergonomic error handling.

use crate::data::{AlarmCode, MachineState};
use thiserror::Error;

/// Controller error type
///
/// Represents failures of a facade operation that are returned straight to the
/// caller: precondition violations, timeouts and refused motion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// Controller is not connected
    #[error("Controller not connected")]
    NotConnected,

    /// Controller is already connected
    #[error("Controller already connected")]
    AlreadyConnected,

    /// An awaited acknowledgment never arrived
    #[error("Command '{command}' timed out after {timeout_ms}ms")]
    CommandTimeout {
        /// The line that was waiting for its acknowledgment.
        command: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Motion refused because an alarm is latched
    #[error("Alarm active{}", alarm_suffix(.code))]
    AlarmActive {
        /// The latched alarm, if its code is known.
        code: Option<AlarmCode>,
    },

    /// A job is already streaming or paused
    #[error("A job is already running")]
    AlreadyRunning,

    /// The machine is not in a state that accepts the request
    #[error("Machine not ready (state: {state})")]
    MachineNotReady {
        /// The state the machine was in.
        state: MachineState,
    },

    /// A numeric argument exceeded its configured bound
    #[error("{what} {value} is out of range (max {max})")]
    OutOfRange {
        /// What was out of range.
        what: String,
        /// The requested value.
        value: f64,
        /// The configured maximum.
        max: f64,
    },

    /// An argument combination cannot produce a valid command
    #[error("Invalid argument: {reason}")]
    InvalidArgument {
        /// Why the arguments were rejected.
        reason: String,
    },

    /// Too many lines queued
    #[error("Buffer overflow: {message}")]
    BufferOverflow {
        /// A message describing the buffer overflow.
        message: String,
    },
}

fn alarm_suffix(code: &Option<AlarmCode>) -> String {
    code.map(|c| format!(": {}", c)).unwrap_or_default()
}

/// Connection error type
///
/// Represents errors related to the serial channel and the firmware handshake.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectionError {
    /// Failed to open port
    #[error("Failed to open port {port}: {reason}")]
    FailedToOpen {
        /// The name of the port that failed to open.
        port: String,
        /// The reason the port failed to open.
        reason: String,
    },

    /// The firmware banner was not seen in time
    #[error("No '{signature}' banner from {port} within {timeout_ms}ms")]
    HandshakeFailed {
        /// The port that was being opened.
        port: String,
        /// The signature that was expected in the banner.
        signature: String,
        /// The handshake timeout in milliseconds.
        timeout_ms: u64,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// Serial port error
    #[error("Serial port error: {reason}")]
    SerialError {
        /// The reason for the serial port error.
        reason: String,
    },

    /// Invalid connection parameters
    #[error("Invalid connection parameters: {reason}")]
    InvalidParameters {
        /// The reason the parameters are invalid.
        reason: String,
    },
}

/// Main error type for GrblKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Controller error
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Controller(ControllerError::CommandTimeout { .. })
                | Error::Connection(ConnectionError::HandshakeFailed { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_))
    }

    /// Check if motion was refused because of a latched alarm
    pub fn is_alarm_active(&self) -> bool {
        matches!(self, Error::Controller(ControllerError::AlarmActive { .. }))
    }

    /// Borrow the controller error, if this is one
    pub fn as_controller(&self) -> Option<&ControllerError> {
        match self {
            Error::Controller(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_active_display() {
        let err = ControllerError::AlarmActive {
            code: Some(AlarmCode::HardLimit),
        };
        assert!(err.to_string().starts_with("Alarm active: ALARM:1"));
        let bare = ControllerError::AlarmActive { code: None };
        assert_eq!(bare.to_string(), "Alarm active");
    }

    #[test]
    fn test_error_classification() {
        let timeout: Error = ControllerError::CommandTimeout {
            command: "G0 X1".into(),
            timeout_ms: 10,
        }
        .into();
        assert!(timeout.is_timeout());
        assert!(!timeout.is_connection_error());

        let lost: Error = ConnectionError::ConnectionLost {
            reason: "unplugged".into(),
        }
        .into();
        assert!(lost.is_connection_error());
        assert!(lost.as_controller().is_none());
    }
}
