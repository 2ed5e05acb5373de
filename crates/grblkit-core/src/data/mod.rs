//! Data models for machine state, positions, and status
//!
//! This module provides:
//! - The closed set of GRBL machine states
//! - Work and machine coordinate tracking
//! - The `StatusSnapshot` the controller keeps current
//! - Alarm/error code taxonomies and job bookkeeping types

pub mod codes;
pub mod job;

pub use codes::{AlarmCode, ErrorCode};
pub use job::{JobPhase, JobSummary};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine state as reported by the firmware
///
/// Exactly one state is current at any time. Every variant except
/// `Disconnected` comes from a status report; `Disconnected` is the only
/// state the controller sets locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// Ready for commands
    Idle,
    /// Executing motion
    Run,
    /// Feed hold active
    Hold,
    /// Jogging
    Jog,
    /// Locked out by an alarm
    Alarm,
    /// Safety door open
    Door,
    /// G-code check mode
    Check,
    /// Homing cycle in progress
    Home,
    /// Sleeping
    Sleep,
    /// No link to the device
    Disconnected,
}

impl MachineState {
    /// Parse the state name of a status report (without any `:<code>` suffix).
    ///
    /// `Disconnected` is never reported by the device, so it does not parse.
    pub fn from_grbl_state(name: &str) -> Option<Self> {
        match name {
            "Idle" => Some(Self::Idle),
            "Run" => Some(Self::Run),
            "Hold" => Some(Self::Hold),
            "Jog" => Some(Self::Jog),
            "Alarm" => Some(Self::Alarm),
            "Door" => Some(Self::Door),
            "Check" => Some(Self::Check),
            "Home" => Some(Self::Home),
            "Sleep" => Some(Self::Sleep),
            _ => None,
        }
    }

    /// Name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Run => "Run",
            Self::Hold => "Hold",
            Self::Jog => "Jog",
            Self::Alarm => "Alarm",
            Self::Door => "Door",
            Self::Check => "Check",
            Self::Home => "Home",
            Self::Sleep => "Sleep",
            Self::Disconnected => "Disconnected",
        }
    }

    /// Check if this state indicates the controller is connected
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single X/Y/Z coordinate triple in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinates {
    /// X-axis position
    pub x: f64,
    /// Y-axis position
    pub y: f64,
    /// Z-axis position
    pub z: f64,
}

impl Coordinates {
    /// Create a coordinate triple
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// Component-wise difference
    pub fn minus(&self, other: &Coordinates) -> Coordinates {
        Coordinates::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    /// Component-wise sum
    pub fn plus(&self, other: &Coordinates) -> Coordinates {
        Coordinates::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    /// Check whether two triples agree within `tolerance` on every axis
    pub fn approx_eq(&self, other: &Coordinates, tolerance: f64) -> bool {
        (self.x - other.x).abs() <= tolerance
            && (self.y - other.y).abs() <= tolerance
            && (self.z - other.z).abs() <= tolerance
    }
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3},{:.3},{:.3}", self.x, self.y, self.z)
    }
}

/// Work and machine coordinates
///
/// The two triples are independent: the firmware applies its work coordinate
/// offset internally, so one can only be derived from the other when that
/// offset has been reported.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    /// Position relative to the active work origin
    pub work: Coordinates,
    /// Position relative to the machine home reference
    pub machine: Coordinates,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WPos:{} MPos:{}", self.work, self.machine)
    }
}

/// Override percentages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overrides {
    /// Feed override percentage
    pub feed: u16,
    /// Rapid override percentage
    pub rapid: u16,
    /// Spindle override percentage
    pub spindle: u16,
}

impl Default for Overrides {
    fn default() -> Self {
        Self {
            feed: 100,
            rapid: 100,
            spindle: 100,
        }
    }
}

/// Input pin flags from the `Pn:` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinState {
    /// Probe input triggered
    pub probe: bool,
    /// X limit switch triggered
    pub limit_x: bool,
    /// Y limit switch triggered
    pub limit_y: bool,
    /// Z limit switch triggered
    pub limit_z: bool,
    /// Safety door open
    pub door: bool,
}

impl PinState {
    /// Whether any limit switch is active
    pub fn any_limit(&self) -> bool {
        self.limit_x || self.limit_y || self.limit_z
    }
}

/// The authoritative, continuously overwritten view of the device
///
/// One instance exists per controller. Only the response decoder mutates it;
/// everything else reads copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Current machine state
    pub state: MachineState,
    /// Sub-state code reported after the state name (`Hold:0`, `Door:1`)
    pub sub_state: Option<u8>,
    /// Work and machine coordinates
    pub position: Position,
    /// Last reported work coordinate offset
    pub work_offset: Option<Coordinates>,
    /// Current feed rate (mm/min)
    pub feed_rate: f64,
    /// Current spindle speed (RPM)
    pub spindle_speed: f64,
    /// Override percentages
    pub overrides: Overrides,
    /// Probe/limit/door flags
    pub pins: PinState,
    /// Free planner blocks
    pub planner_blocks_available: Option<u16>,
    /// Free bytes in the device receive buffer
    pub rx_bytes_available: Option<u16>,
    /// Line number currently executing
    pub line_number: Option<u32>,
    /// Code of the latched alarm; `None` for codes outside the known set
    pub alarm: Option<AlarmCode>,
    /// Set by any `ALARM:` line, cleared only by a successful unlock
    pub alarm_latched: bool,
    /// Rejection of the most recent line, cleared by the next `ok`
    pub error: Option<ErrorCode>,
    /// Lines acknowledged with `ok` since connecting
    pub lines_completed: u64,
    /// Lines rejected with `error:` since connecting
    pub error_count: u64,
}

impl StatusSnapshot {
    /// Fresh snapshot for a controller with no link
    pub fn disconnected() -> Self {
        Self {
            state: MachineState::Disconnected,
            sub_state: None,
            position: Position::default(),
            work_offset: None,
            feed_rate: 0.0,
            spindle_speed: 0.0,
            overrides: Overrides::default(),
            pins: PinState::default(),
            planner_blocks_available: None,
            rx_bytes_available: None,
            line_number: None,
            alarm: None,
            alarm_latched: false,
            error: None,
            lines_completed: 0,
            error_count: 0,
        }
    }

    /// Whether motion-issuing commands must be refused
    pub fn is_alarm_latched(&self) -> bool {
        self.alarm_latched
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::disconnected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_state_parse() {
        assert_eq!(MachineState::from_grbl_state("Idle"), Some(MachineState::Idle));
        assert_eq!(MachineState::from_grbl_state("Home"), Some(MachineState::Home));
        assert_eq!(MachineState::from_grbl_state("Disconnected"), None);
        assert_eq!(MachineState::from_grbl_state("idle"), None);
        for state in [
            MachineState::Idle,
            MachineState::Run,
            MachineState::Hold,
            MachineState::Jog,
            MachineState::Alarm,
            MachineState::Door,
            MachineState::Check,
            MachineState::Home,
            MachineState::Sleep,
        ] {
            assert_eq!(MachineState::from_grbl_state(state.as_str()), Some(state));
        }
    }

    #[test]
    fn test_coordinates_math() {
        let mpos = Coordinates::new(10.0, 20.0, -5.0);
        let wco = Coordinates::new(1.0, 2.0, -3.0);
        let wpos = mpos.minus(&wco);
        assert!(wpos.approx_eq(&Coordinates::new(9.0, 18.0, -2.0), 1e-9));
        assert!(wpos.plus(&wco).approx_eq(&mpos, 1e-9));
        assert_eq!(mpos.to_string(), "10.000,20.000,-5.000");
    }

    #[test]
    fn test_snapshot_default() {
        let snapshot = StatusSnapshot::default();
        assert_eq!(snapshot.state, MachineState::Disconnected);
        assert_eq!(snapshot.overrides.feed, 100);
        assert!(!snapshot.is_alarm_latched());
    }

    #[test]
    fn test_any_limit_ignores_probe_and_door() {
        let mut pins = PinState {
            probe: true,
            door: true,
            ..Default::default()
        };
        assert!(!pins.any_limit());
        pins.limit_z = true;
        assert!(pins.any_limit());
    }
}
