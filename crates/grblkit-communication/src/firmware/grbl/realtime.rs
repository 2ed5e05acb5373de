//! GRBL real-time command bytes
//!
//! These single bytes bypass the line queue and the device's receive buffer;
//! GRBL acts on them as soon as they arrive, even mid-line.

use serde::{Deserialize, Serialize};

/// Single-byte commands picked off the serial stream by the firmware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RealtimeCommand {
    /// Soft reset (Ctrl-X)
    Reset,
    /// Request a status report
    StatusReport,
    /// Cycle start / resume
    CycleStart,
    /// Feed hold
    FeedHold,
    /// Cancel the current jog
    JogCancel,
    /// Feed override back to 100%
    FeedOverrideReset,
    /// Feed override +10%
    FeedOverridePlusTen,
    /// Feed override -10%
    FeedOverrideMinusTen,
    /// Feed override +1%
    FeedOverridePlusOne,
    /// Feed override -1%
    FeedOverrideMinusOne,
    /// Rapid override back to 100%
    RapidOverrideReset,
    /// Rapid override 50%
    RapidOverrideHalf,
    /// Rapid override 25%
    RapidOverrideQuarter,
    /// Spindle override back to 100%
    SpindleOverrideReset,
    /// Spindle override +10%
    SpindleOverridePlusTen,
    /// Spindle override -10%
    SpindleOverrideMinusTen,
    /// Spindle override +1%
    SpindleOverridePlusOne,
    /// Spindle override -1%
    SpindleOverrideMinusOne,
    /// Toggle spindle stop (only honoured in Hold)
    ToggleSpindleStop,
}

impl RealtimeCommand {
    /// The byte written to the wire
    pub fn byte(self) -> u8 {
        match self {
            RealtimeCommand::Reset => 0x18,
            RealtimeCommand::StatusReport => b'?',
            RealtimeCommand::CycleStart => b'~',
            RealtimeCommand::FeedHold => b'!',
            RealtimeCommand::JogCancel => 0x85,
            RealtimeCommand::FeedOverrideReset => 0x90,
            RealtimeCommand::FeedOverridePlusTen => 0x91,
            RealtimeCommand::FeedOverrideMinusTen => 0x92,
            RealtimeCommand::FeedOverridePlusOne => 0x93,
            RealtimeCommand::FeedOverrideMinusOne => 0x94,
            RealtimeCommand::RapidOverrideReset => 0x95,
            RealtimeCommand::RapidOverrideHalf => 0x96,
            RealtimeCommand::RapidOverrideQuarter => 0x97,
            RealtimeCommand::SpindleOverrideReset => 0x99,
            RealtimeCommand::SpindleOverridePlusTen => 0x9A,
            RealtimeCommand::SpindleOverrideMinusTen => 0x9B,
            RealtimeCommand::SpindleOverridePlusOne => 0x9C,
            RealtimeCommand::SpindleOverrideMinusOne => 0x9D,
            RealtimeCommand::ToggleSpindleStop => 0x9E,
        }
    }

    /// Whether a byte on the wire is interpreted as a real-time command
    pub fn is_realtime_byte(byte: u8) -> bool {
        matches!(byte, b'?' | b'!' | b'~' | 0x18) || byte >= 0x80
    }
}

/// Which override a [`feed_override`](crate::GrblController::feed_override) call adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideAdjustment {
    /// Back to 100%
    Reset,
    /// Coarse step up
    CoarseUp,
    /// Coarse step down
    CoarseDown,
    /// Fine step up
    FineUp,
    /// Fine step down
    FineDown,
}

impl OverrideAdjustment {
    /// Feed override byte for this adjustment
    pub fn feed(self) -> RealtimeCommand {
        match self {
            OverrideAdjustment::Reset => RealtimeCommand::FeedOverrideReset,
            OverrideAdjustment::CoarseUp => RealtimeCommand::FeedOverridePlusTen,
            OverrideAdjustment::CoarseDown => RealtimeCommand::FeedOverrideMinusTen,
            OverrideAdjustment::FineUp => RealtimeCommand::FeedOverridePlusOne,
            OverrideAdjustment::FineDown => RealtimeCommand::FeedOverrideMinusOne,
        }
    }

    /// Spindle override byte for this adjustment
    pub fn spindle(self) -> RealtimeCommand {
        match self {
            OverrideAdjustment::Reset => RealtimeCommand::SpindleOverrideReset,
            OverrideAdjustment::CoarseUp => RealtimeCommand::SpindleOverridePlusTen,
            OverrideAdjustment::CoarseDown => RealtimeCommand::SpindleOverrideMinusTen,
            OverrideAdjustment::FineUp => RealtimeCommand::SpindleOverridePlusOne,
            OverrideAdjustment::FineDown => RealtimeCommand::SpindleOverrideMinusOne,
        }
    }
}
