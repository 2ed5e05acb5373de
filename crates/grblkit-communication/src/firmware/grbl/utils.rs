//! GRBL Protocol Utilities
//!
//! Command formatting for the facade operations and setting lookups.

/// Format a number the way GRBL expects: at most three decimals, no
/// trailing zeros.
pub fn format_value(value: f64) -> String {
    let text = format!("{:.3}", value);
    let text = text.trim_end_matches('0').trim_end_matches('.');
    match text {
        "-0" | "" => "0".to_string(),
        _ => text.to_string(),
    }
}

fn axis_words(axes: [(char, Option<f64>); 3]) -> Vec<String> {
    axes.iter()
        .filter_map(|(letter, value)| value.map(|v| format!("{}{}", letter, format_value(v))))
        .collect()
}

/// Relative metric jog; `None` when every axis is zero
pub fn jog_command(dx: f64, dy: f64, dz: f64, feed: f64) -> Option<String> {
    let nonzero = |v: f64| (v != 0.0).then_some(v);
    let words = axis_words([('X', nonzero(dx)), ('Y', nonzero(dy)), ('Z', nonzero(dz))]);
    if words.is_empty() {
        return None;
    }
    Some(format!(
        "$J=G91 G21 {} F{}",
        words.join(" "),
        format_value(feed)
    ))
}

/// Absolute linear move; `None` when no axis is given
pub fn move_command(x: Option<f64>, y: Option<f64>, z: Option<f64>, feed: f64) -> Option<String> {
    let words = axis_words([('X', x), ('Y', y), ('Z', z)]);
    if words.is_empty() {
        return None;
    }
    Some(format!("G90 G1 {} F{}", words.join(" "), format_value(feed)))
}

/// Spindle on/off
pub fn spindle_command(rpm: f64, clockwise: bool) -> String {
    if rpm == 0.0 {
        return "M5".to_string();
    }
    let direction = if clockwise { "M3" } else { "M4" };
    format!("{} S{}", direction, format_value(rpm))
}

/// Straight probe toward the workpiece along -Z
pub fn probe_command(feed: f64, max_distance: f64) -> String {
    format!(
        "G38.2 Z-{} F{}",
        format_value(max_distance.abs()),
        format_value(feed)
    )
}

/// Prefix a setting key with `$` if the caller left it off
pub fn normalize_setting_key(key: &str) -> String {
    let key = key.trim();
    if key.starts_with('$') {
        key.to_string()
    } else {
        format!("${}", key)
    }
}

/// `$key=value` write
pub fn setting_command(key: &str, value: &str) -> String {
    format!("{}={}", normalize_setting_key(key), value.trim())
}

/// The executable part of a G-code line: `(...)` groups and anything after
/// `;` removed, surrounding whitespace trimmed
pub fn strip_comments(line: &str) -> String {
    let mut code = String::with_capacity(line.len());
    let mut depth = 0usize;
    for c in line.chars() {
        match c {
            ';' if depth == 0 => break,
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => code.push(c),
            _ => {}
        }
    }
    code.trim().to_string()
}

/// Whether a line can move the machine: homing, jogging, or a G0-G3 or
/// G38.x motion word
pub fn is_motion_command(line: &str) -> bool {
    let code = strip_comments(line).to_ascii_uppercase();
    if code.starts_with("$H") || code.starts_with("$J=") {
        return true;
    }
    if code.starts_with('$') {
        return false;
    }

    let mut rest = code.as_str();
    while let Some(at) = rest.find('G') {
        rest = &rest[at + 1..];
        let number: String = rest
            .chars()
            .skip_while(|c| *c == ' ')
            .take_while(|c| c.is_ascii_digit() || *c == '.')
            .collect();
        if let Ok(value) = number.parse::<f64>() {
            if value == value.trunc() && (0.0..=3.0).contains(&value) {
                return true;
            }
            if (38.0..39.0).contains(&value) {
                return true;
            }
        }
    }
    false
}

/// Get setting name from setting number
pub fn get_setting_name(setting_num: u16) -> &'static str {
    match setting_num {
        0 => "Step pulse time",
        1 => "Step idle delay",
        2 => "Step pulse invert mask",
        3 => "Step direction invert mask",
        4 => "Invert step enable pin",
        5 => "Invert limit pins",
        6 => "Invert probe pin",
        10 => "Status report options",
        11 => "Junction deviation",
        12 => "Arc tolerance",
        13 => "Report in inches",
        20 => "Soft limits enable",
        21 => "Hard limits enable",
        22 => "Homing cycle enable",
        23 => "Homing direction invert mask",
        24 => "Homing locate feed rate",
        25 => "Homing search seek rate",
        26 => "Homing switch debounce delay",
        27 => "Homing switch pull-off distance",
        30 => "Maximum spindle speed",
        31 => "Minimum spindle speed",
        32 => "Laser mode enable",
        100 => "X steps/mm",
        101 => "Y steps/mm",
        102 => "Z steps/mm",
        110 => "X max rate",
        111 => "Y max rate",
        112 => "Z max rate",
        120 => "X accel",
        121 => "Y accel",
        122 => "Z accel",
        130 => "X max travel",
        131 => "Y max travel",
        132 => "Z max travel",
        _ => "Unknown setting",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_value() {
        assert_eq!(format_value(10.0), "10");
        assert_eq!(format_value(1.25), "1.25");
        assert_eq!(format_value(-0.0001), "0");
        assert_eq!(format_value(0.1234), "0.123");
    }

    #[test]
    fn test_jog_command() {
        assert_eq!(
            jog_command(10.0, 0.0, -1.5, 500.0).as_deref(),
            Some("$J=G91 G21 X10 Z-1.5 F500")
        );
        assert_eq!(jog_command(0.0, 0.0, 0.0, 500.0), None);
    }

    #[test]
    fn test_move_and_spindle() {
        assert_eq!(
            move_command(Some(1.0), None, Some(2.0), 300.0).as_deref(),
            Some("G90 G1 X1 Z2 F300")
        );
        assert_eq!(move_command(None, None, None, 300.0), None);
        assert_eq!(spindle_command(0.0, true), "M5");
        assert_eq!(spindle_command(12000.0, true), "M3 S12000");
        assert_eq!(spindle_command(8000.0, false), "M4 S8000");
    }

    #[test]
    fn test_probe_and_settings() {
        assert_eq!(probe_command(100.0, 20.0), "G38.2 Z-20 F100");
        assert_eq!(setting_command("110", "500"), "$110=500");
        assert_eq!(setting_command("$22", " 1 "), "$22=1");
        assert_eq!(get_setting_name(22), "Homing cycle enable");
    }

    #[test]
    fn test_strip_comments() {
        assert_eq!(strip_comments("(a) G0 X1 (b)"), "G0 X1");
        assert_eq!(strip_comments("G1 X2 ; tail (not a group"), "G1 X2");
        assert_eq!(strip_comments("(only a comment)"), "");
        assert_eq!(strip_comments("  ; header"), "");
    }

    #[test]
    fn test_motion_classification() {
        for line in [
            "$H",
            "$J=G91 X5 F100",
            "G0 X10",
            "g1x1f100",
            "G90 G01 Z-1",
            "G38.2 Z-5 F50",
            "G2 X1 Y1 I1",
        ] {
            assert!(is_motion_command(line), "{}", line);
        }
        for line in [
            "$X",
            "$$",
            "$110=500",
            "G21",
            "G90",
            "G4 P1",
            "M3 S1000",
            "G10 L20 P1 X0",
            "G28.1",
            "(G0 X1) M5",
        ] {
            assert!(!is_motion_command(line), "{}", line);
        }
    }
}
