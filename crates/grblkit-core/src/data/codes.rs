//! GRBL alarm and error codes
//!
//! Both sets are closed: a numeric code outside the documented range does not
//! map to a variant and callers must handle `None` explicitly.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Device-level safety stop, reported as `ALARM:<n>`.
///
/// An alarm is sticky: it stays latched until an unlock (`$X`) is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlarmCode {
    /// Hard limit triggered; position likely lost.
    HardLimit,
    /// Motion target exceeds machine travel.
    SoftLimit,
    /// Reset while in motion.
    AbortCycle,
    /// Probe not in the expected initial state.
    ProbeFailInitial,
    /// Probe did not contact within the programmed travel.
    ProbeFailContact,
    /// Reset during the homing cycle.
    HomingFailReset,
    /// Safety door opened during homing.
    HomingFailDoor,
    /// Homing failed to clear the limit switch when pulling off.
    HomingFailPulloff,
    /// Homing could not find the limit switch.
    HomingFailApproach,
}

impl AlarmCode {
    /// All alarm codes in numeric order
    pub const ALL: [AlarmCode; 9] = [
        AlarmCode::HardLimit,
        AlarmCode::SoftLimit,
        AlarmCode::AbortCycle,
        AlarmCode::ProbeFailInitial,
        AlarmCode::ProbeFailContact,
        AlarmCode::HomingFailReset,
        AlarmCode::HomingFailDoor,
        AlarmCode::HomingFailPulloff,
        AlarmCode::HomingFailApproach,
    ];

    /// Map a wire code to an alarm
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1..=9 => Some(Self::ALL[usize::from(code) - 1]),
            _ => None,
        }
    }

    /// Numeric code as sent by the firmware
    pub fn code(self) -> u8 {
        match self {
            AlarmCode::HardLimit => 1,
            AlarmCode::SoftLimit => 2,
            AlarmCode::AbortCycle => 3,
            AlarmCode::ProbeFailInitial => 4,
            AlarmCode::ProbeFailContact => 5,
            AlarmCode::HomingFailReset => 6,
            AlarmCode::HomingFailDoor => 7,
            AlarmCode::HomingFailPulloff => 8,
            AlarmCode::HomingFailApproach => 9,
        }
    }

    /// Human-readable explanation
    pub fn description(self) -> &'static str {
        match self {
            AlarmCode::HardLimit => "Hard limit triggered. Machine position is likely lost due to sudden and immediate halt. Re-homing is highly recommended.",
            AlarmCode::SoftLimit => "Soft limit: G-code motion target exceeds machine travel. Machine position safely retained. Alarm may be unlocked.",
            AlarmCode::AbortCycle => "Reset while in motion. Grbl cannot guarantee position. Lost steps are likely. Re-homing is highly recommended.",
            AlarmCode::ProbeFailInitial => "Probe fail. The probe is not in the expected initial state before starting probe cycle.",
            AlarmCode::ProbeFailContact => "Probe fail. Probe did not contact the workpiece within the programmed travel.",
            AlarmCode::HomingFailReset => "Homing fail. Reset during active homing cycle.",
            AlarmCode::HomingFailDoor => "Homing fail. Safety door was opened during active homing cycle.",
            AlarmCode::HomingFailPulloff => "Homing fail. Cycle failed to clear limit switch when pulling off.",
            AlarmCode::HomingFailApproach => "Homing fail. Could not find limit switch within search distance.",
        }
    }
}

impl fmt::Display for AlarmCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ALARM:{} - {}", self.code(), self.description())
    }
}

/// Per-line rejection, reported as `error:<n>`.
///
/// Errors are transient: they apply only to the line that provoked them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    /// G-code word without a letter.
    ExpectedCommandLetter,
    /// Numeric value missing or malformed.
    BadNumberFormat,
    /// `$` system command not recognized.
    InvalidStatement,
    /// Negative value where a positive one was expected.
    NegativeValue,
    /// Homing cycle not enabled in settings.
    SettingDisabled,
    /// Step pulse time below the minimum.
    SettingStepPulseMin,
    /// Settings storage read failed; defaults restored.
    SettingReadFail,
    /// `$` command only valid while idle.
    IdleError,
    /// G-code locked out during alarm or jog state.
    SystemGcLock,
    /// Soft limits require homing to be enabled.
    SoftLimitError,
}

impl ErrorCode {
    /// All error codes in numeric order
    pub const ALL: [ErrorCode; 10] = [
        ErrorCode::ExpectedCommandLetter,
        ErrorCode::BadNumberFormat,
        ErrorCode::InvalidStatement,
        ErrorCode::NegativeValue,
        ErrorCode::SettingDisabled,
        ErrorCode::SettingStepPulseMin,
        ErrorCode::SettingReadFail,
        ErrorCode::IdleError,
        ErrorCode::SystemGcLock,
        ErrorCode::SoftLimitError,
    ];

    /// Map a wire code to an error
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1..=10 => Some(Self::ALL[usize::from(code) - 1]),
            _ => None,
        }
    }

    /// Numeric code as sent by the firmware
    pub fn code(self) -> u8 {
        match self {
            ErrorCode::ExpectedCommandLetter => 1,
            ErrorCode::BadNumberFormat => 2,
            ErrorCode::InvalidStatement => 3,
            ErrorCode::NegativeValue => 4,
            ErrorCode::SettingDisabled => 5,
            ErrorCode::SettingStepPulseMin => 6,
            ErrorCode::SettingReadFail => 7,
            ErrorCode::IdleError => 8,
            ErrorCode::SystemGcLock => 9,
            ErrorCode::SoftLimitError => 10,
        }
    }

    /// Human-readable explanation
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::ExpectedCommandLetter => "G-code words consist of a letter and a value. Letter was not found.",
            ErrorCode::BadNumberFormat => "Numeric value format is not valid or missing an expected value.",
            ErrorCode::InvalidStatement => "Grbl '$' system command was not recognized or supported.",
            ErrorCode::NegativeValue => "Negative value received for an expected positive value.",
            ErrorCode::SettingDisabled => "Homing cycle is not enabled via settings.",
            ErrorCode::SettingStepPulseMin => "Minimum step pulse time must be greater than 3us.",
            ErrorCode::SettingReadFail => "EEPROM read failed. Reset and restored to default values.",
            ErrorCode::IdleError => "Grbl '$' command cannot be used unless Grbl is IDLE.",
            ErrorCode::SystemGcLock => "G-code locked out during alarm or jog state.",
            ErrorCode::SoftLimitError => "Soft limits cannot be enabled without homing also enabled.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error:{} - {}", self.code(), self.description())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_codes_are_dense() {
        for (i, alarm) in AlarmCode::ALL.iter().enumerate() {
            assert_eq!(usize::from(alarm.code()), i + 1);
            assert_eq!(AlarmCode::from_code(alarm.code()), Some(*alarm));
        }
        assert_eq!(AlarmCode::from_code(0), None);
        assert_eq!(AlarmCode::from_code(10), None);
    }

    #[test]
    fn test_error_codes_are_dense() {
        for (i, error) in ErrorCode::ALL.iter().enumerate() {
            assert_eq!(usize::from(error.code()), i + 1);
            assert_eq!(ErrorCode::from_code(error.code()), Some(*error));
        }
        assert_eq!(ErrorCode::from_code(0), None);
        assert_eq!(ErrorCode::from_code(20), None);
    }

    #[test]
    fn test_format() {
        assert!(AlarmCode::HardLimit.to_string().starts_with("ALARM:1 - Hard limit"));
        assert!(ErrorCode::SystemGcLock.to_string().starts_with("error:9"));
    }
}
