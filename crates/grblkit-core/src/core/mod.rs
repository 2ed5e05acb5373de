//! Controller abstraction
//!
//! [`ControllerTrait`] is the seam collaborators (HTTP layer, CLI, tests)
//! program against. Every method takes `&self`; implementations serialize
//! access internally so one controller can be shared behind an `Arc`.

use crate::data::{JobSummary, StatusSnapshot};
use crate::error::Result;
use crate::event_bus::{ControllerEvent, EventFilter, SubscriptionId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;

/// How a queued line was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Queued without waiting for the device
    Queued,
    /// The device answered `ok`
    Acknowledged,
    /// The device answered `error:<n>`
    Rejected(u8),
    /// Discarded before an answer arrived (alarm, reset, stop or disconnect)
    Flushed,
}

impl CommandOutcome {
    /// Whether the device accepted the line
    pub fn is_accepted(&self) -> bool {
        matches!(self, CommandOutcome::Acknowledged)
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Queued => write!(f, "queued"),
            CommandOutcome::Acknowledged => write!(f, "ok"),
            CommandOutcome::Rejected(code) => write!(f, "error:{}", code),
            CommandOutcome::Flushed => write!(f, "flushed"),
        }
    }
}

/// Public control surface of a machine controller
///
/// All operations fail with `NotConnected` while disconnected. Motion
/// operations fail with `AlarmActive` while an alarm is latched. Operations
/// that wait for the device block only their caller and are bounded by a
/// timeout.
#[async_trait]
pub trait ControllerTrait: Send + Sync {
    /// Controller name for logging
    fn name(&self) -> &str;

    /// Open the link and complete the firmware handshake
    async fn connect(&self) -> Result<()>;

    /// Stop the workers and close the link. Idempotent.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the link is up
    fn is_connected(&self) -> bool;

    /// Copy of the current status snapshot
    fn get_status(&self) -> StatusSnapshot;

    /// Queue a non-motion line, optionally waiting for its acknowledgment
    async fn send_command(&self, line: &str, wait_for_ack: bool) -> Result<CommandOutcome>;

    /// Run the homing cycle; `true` only if the machine ends up idle
    async fn home(&self) -> Result<bool>;

    /// Relative jog; zero axes are omitted
    async fn jog(&self, dx: f64, dy: f64, dz: f64, feed: f64) -> Result<bool>;

    /// Absolute linear move to the given work coordinates
    async fn move_to(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
        feed: f64,
    ) -> Result<bool>;

    /// Spindle control; `rpm == 0` stops the spindle
    async fn set_spindle(&self, rpm: f64, clockwise: bool) -> Result<bool>;

    /// Probe downward; the work Z of the contact point if the probe triggered
    async fn probe_z(&self, feed: Option<f64>, max_distance: f64) -> Result<Option<f64>>;

    /// Unlock after an alarm
    async fn reset_alarm(&self) -> Result<bool>;

    /// Read all `$` settings from the device
    async fn get_settings(&self) -> Result<BTreeMap<String, String>>;

    /// Write one `$` setting
    async fn set_setting(&self, key: &str, value: &str) -> Result<bool>;

    /// Start streaming a program
    async fn run_gcode_file(&self, lines: Vec<String>) -> Result<bool>;

    /// Feed hold the running job
    async fn pause_job(&self) -> Result<bool>;

    /// Cycle start a paused job
    async fn resume_job(&self) -> Result<bool>;

    /// Abort the running job
    async fn stop_job(&self) -> Result<bool>;

    /// Progress of the current or most recent job
    fn job_summary(&self) -> Option<JobSummary>;

    /// Register a synchronous event handler
    fn subscribe(
        &self,
        filter: EventFilter,
        handler: Box<dyn Fn(ControllerEvent) + Send + Sync>,
    ) -> SubscriptionId;

    /// Remove a handler registered with [`ControllerTrait::subscribe`]
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}
