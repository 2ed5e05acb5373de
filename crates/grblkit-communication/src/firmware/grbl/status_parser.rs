//! GRBL Status Report Parsing
//!
//! Parses `<State[:sub]|Key:value|...>` real-time status reports into a
//! [`StatusReport`]. Every field except the state is optional because GRBL
//! only sends what changed or what `$10` asks for; the decoder decides how
//! absent fields affect the snapshot.
//!
//! `StatusReport` also implements `Display`, producing the wire form, which
//! the device simulator in the test suite uses.

use grblkit_core::{Coordinates, MachineState, Overrides, PinState};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::DecodeError;

/// Planner and receive buffer availability (`Bf:planner,rx`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferState {
    /// Free planner blocks
    pub planner_blocks: u16,
    /// Free bytes in the serial receive buffer
    pub rx_bytes: u16,
}

/// One parsed status report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    /// Machine state
    pub state: MachineState,
    /// Sub-state code (`Hold:0`, `Door:1`)
    pub sub_state: Option<u8>,
    /// Machine position
    pub mpos: Option<Coordinates>,
    /// Work position
    pub wpos: Option<Coordinates>,
    /// Work coordinate offset
    pub wco: Option<Coordinates>,
    /// Feed rate
    pub feed_rate: Option<f64>,
    /// Spindle speed
    pub spindle_speed: Option<f64>,
    /// Buffer state
    pub buffer: Option<BufferState>,
    /// Line number
    pub line_number: Option<u32>,
    /// Override percentages
    pub overrides: Option<Overrides>,
    /// Active input pins; `None` when the field was absent
    pub pins: Option<PinState>,
}

impl StatusReport {
    /// Report carrying only a state
    pub fn new(state: MachineState) -> Self {
        Self {
            state,
            sub_state: None,
            mpos: None,
            wpos: None,
            wco: None,
            feed_rate: None,
            spindle_speed: None,
            buffer: None,
            line_number: None,
            overrides: None,
            pins: None,
        }
    }

    /// Parse a status line, with or without the surrounding angle brackets
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let body = line.trim();
        let body = body
            .strip_prefix('<')
            .and_then(|b| b.strip_suffix('>'))
            .unwrap_or(body);

        let mut fields = body.split('|');
        let head = fields.next().unwrap_or_default();
        let (name, sub) = match head.split_once(':') {
            Some((name, sub)) => (name, Some(sub)),
            None => (head, None),
        };
        let state = MachineState::from_grbl_state(name)
            .ok_or_else(|| DecodeError::UnknownState(name.to_string()))?;

        let mut report = StatusReport::new(state);
        report.sub_state = match sub {
            Some(code) => Some(parse_number::<u8>("state", code)?),
            None => None,
        };

        for field in fields {
            let Some((key, value)) = field.split_once(':') else {
                // Bare words (e.g. a trailing empty segment) carry nothing
                continue;
            };
            match key {
                "MPos" => report.mpos = Some(parse_coordinates(key, value)?),
                "WPos" => report.wpos = Some(parse_coordinates(key, value)?),
                "WCO" => report.wco = Some(parse_coordinates(key, value)?),
                "F" => report.feed_rate = Some(parse_number(key, value)?),
                "S" => report.spindle_speed = Some(parse_number(key, value)?),
                "FS" => {
                    let [feed, spindle] = parse_list::<f64, 2>(key, value)?;
                    report.feed_rate = Some(feed);
                    report.spindle_speed = Some(spindle);
                }
                "Bf" => {
                    let [planner_blocks, rx_bytes] = parse_list::<u16, 2>(key, value)?;
                    report.buffer = Some(BufferState {
                        planner_blocks,
                        rx_bytes,
                    });
                }
                "Ln" => report.line_number = Some(parse_number(key, value)?),
                "Ov" => {
                    let [feed, rapid, spindle] = parse_list::<u16, 3>(key, value)?;
                    report.overrides = Some(Overrides {
                        feed,
                        rapid,
                        spindle,
                    });
                }
                "Pn" => report.pins = Some(parse_pins(value)),
                _ => {}
            }
        }

        Ok(report)
    }

    /// Fill in whichever position triple is missing from the offset.
    ///
    /// GRBL reports either `MPos` or `WPos` depending on `$10`; with `WCO`
    /// known the other follows as `WPos = MPos - WCO`.
    pub fn derive_positions(&mut self, wco: Option<Coordinates>) {
        let Some(wco) = self.wco.or(wco) else {
            return;
        };
        match (self.mpos, self.wpos) {
            (Some(mpos), None) => self.wpos = Some(mpos.minus(&wco)),
            (None, Some(wpos)) => self.mpos = Some(wpos.plus(&wco)),
            _ => {}
        }
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}", self.state)?;
        if let Some(sub) = self.sub_state {
            write!(f, ":{}", sub)?;
        }
        if let Some(mpos) = &self.mpos {
            write!(f, "|MPos:{}", mpos)?;
        }
        if let Some(wpos) = &self.wpos {
            write!(f, "|WPos:{}", wpos)?;
        }
        if let Some(buffer) = &self.buffer {
            write!(f, "|Bf:{},{}", buffer.planner_blocks, buffer.rx_bytes)?;
        }
        if let Some(line) = self.line_number {
            write!(f, "|Ln:{}", line)?;
        }
        match (self.feed_rate, self.spindle_speed) {
            (Some(feed), Some(spindle)) => write!(f, "|FS:{},{}", feed, spindle)?,
            (Some(feed), None) => write!(f, "|F:{}", feed)?,
            (None, Some(spindle)) => write!(f, "|S:{}", spindle)?,
            (None, None) => {}
        }
        if let Some(pins) = &self.pins {
            f.write_str("|Pn:")?;
            for (active, letter) in [
                (pins.probe, 'P'),
                (pins.limit_x, 'X'),
                (pins.limit_y, 'Y'),
                (pins.limit_z, 'Z'),
                (pins.door, 'D'),
            ] {
                if active {
                    write!(f, "{}", letter)?;
                }
            }
        }
        if let Some(wco) = &self.wco {
            write!(f, "|WCO:{}", wco)?;
        }
        if let Some(ov) = &self.overrides {
            write!(f, "|Ov:{},{},{}", ov.feed, ov.rapid, ov.spindle)?;
        }
        f.write_str(">")
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, DecodeError> {
    value.trim().parse::<T>().map_err(|_| DecodeError::BadField {
        field: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_list<T: std::str::FromStr + Copy + Default, const N: usize>(
    key: &str,
    value: &str,
) -> Result<[T; N], DecodeError> {
    let parts: Vec<&str> = value.split(',').collect();
    // Extra axes (A/B/C) are tolerated and ignored
    if parts.len() < N {
        return Err(DecodeError::BadField {
            field: key.to_string(),
            value: value.to_string(),
        });
    }
    let mut out = [T::default(); N];
    for (slot, part) in out.iter_mut().zip(parts) {
        *slot = parse_number(key, part)?;
    }
    Ok(out)
}

fn parse_coordinates(key: &str, value: &str) -> Result<Coordinates, DecodeError> {
    let [x, y, z] = parse_list::<f64, 3>(key, value)?;
    Ok(Coordinates::new(x, y, z))
}

fn parse_pins(value: &str) -> PinState {
    let mut pins = PinState::default();
    for letter in value.chars() {
        match letter {
            'P' => pins.probe = true,
            'X' => pins.limit_x = true,
            'Y' => pins.limit_y = true,
            'Z' => pins.limit_z = true,
            'D' => pins.door = true,
            _ => {}
        }
    }
    pins
}
