//! Event type definitions for the event bus.
//!
//! Events are cloneable and serializable so that a collaborator can log or
//! persist them (job history lives outside this crate).

use serde::{Deserialize, Serialize};

use crate::data::{AlarmCode, JobSummary, StatusSnapshot};

/// Notification emitted by the controller after a state mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ControllerEvent {
    /// Handshake succeeded
    Connected {
        /// Port name.
        port: String,
        /// Banner line that identified the firmware.
        firmware: String,
    },
    /// Link closed
    Disconnected,
    /// A status report was applied to the snapshot
    Status(StatusSnapshot),
    /// The device raised an alarm; `None` when the code is outside the known set
    Alarm(Option<AlarmCode>),
    /// The device rejected a line with `error:<n>`
    LineRejected {
        /// The rejected line, if it was still tracked.
        line: String,
        /// Numeric error code as reported.
        code: u8,
    },
    /// Informational `[...]` line or firmware banner
    Message(String),
    /// A `$key=value` line was received
    SettingChanged {
        /// Setting key including the `$` prefix.
        key: String,
        /// Raw value.
        value: String,
    },
    /// A job began streaming
    JobStarted(JobSummary),
    /// A job was paused with a feed hold
    JobPaused(JobSummary),
    /// A paused job resumed
    JobResumed(JobSummary),
    /// All job lines were resolved
    JobCompleted(JobSummary),
    /// A job was aborted
    JobStopped(JobSummary),
}

impl ControllerEvent {
    /// Get the category of this event
    pub fn category(&self) -> EventCategory {
        match self {
            ControllerEvent::Connected { .. } | ControllerEvent::Disconnected => {
                EventCategory::Connection
            }
            ControllerEvent::Status(_) => EventCategory::Status,
            ControllerEvent::Alarm(_) => EventCategory::Alarm,
            ControllerEvent::LineRejected { .. }
            | ControllerEvent::Message(_)
            | ControllerEvent::SettingChanged { .. } => EventCategory::Console,
            ControllerEvent::JobStarted(_)
            | ControllerEvent::JobPaused(_)
            | ControllerEvent::JobResumed(_)
            | ControllerEvent::JobCompleted(_)
            | ControllerEvent::JobStopped(_) => EventCategory::Job,
        }
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match self {
            ControllerEvent::Connected { port, firmware } => {
                format!("Connected to {} ({})", port, firmware)
            }
            ControllerEvent::Disconnected => "Disconnected".to_string(),
            ControllerEvent::Status(s) => format!("Status {} {}", s.state, s.position),
            ControllerEvent::Alarm(Some(code)) => format!("Alarm {}", code),
            ControllerEvent::Alarm(None) => "Alarm (unknown code)".to_string(),
            ControllerEvent::LineRejected { line, code } => {
                format!("Line '{}' rejected with error:{}", line, code)
            }
            ControllerEvent::Message(msg) => msg.clone(),
            ControllerEvent::SettingChanged { key, value } => format!("{}={}", key, value),
            ControllerEvent::JobStarted(j) => {
                format!("Job {} started ({} lines)", j.id, j.sendable_lines)
            }
            ControllerEvent::JobPaused(j) => format!("Job {} paused", j.id),
            ControllerEvent::JobResumed(j) => format!("Job {} resumed", j.id),
            ControllerEvent::JobCompleted(j) => format!(
                "Job {} complete ({} resolved, {} rejected)",
                j.id, j.resolved, j.rejected
            ),
            ControllerEvent::JobStopped(j) => {
                format!("Job {} stopped after {} lines", j.id, j.resolved)
            }
        }
    }
}

/// Event category for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventCategory {
    /// Status report updates.
    Status,
    /// Alarm notifications.
    Alarm,
    /// Job lifecycle.
    Job,
    /// Connect and disconnect.
    Connection,
    /// Rejections, messages and settings traffic.
    Console,
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventCategory::Status => write!(f, "Status"),
            EventCategory::Alarm => write!(f, "Alarm"),
            EventCategory::Job => write!(f, "Job"),
            EventCategory::Connection => write!(f, "Connection"),
            EventCategory::Console => write!(f, "Console"),
        }
    }
}
