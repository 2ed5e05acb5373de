//! GRBL Response Parser
//!
//! Classifies one incoming line as a status report, acknowledgment, error,
//! alarm, setting, informational message or startup banner.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::status_parser::StatusReport;
use super::DecodeError;

/// GRBL response types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GrblResponse {
    /// OK acknowledgment
    Ok,
    /// `error:<n>`; the raw code so that unknown codes can still retire a line.
    /// A non-numeric payload decodes as 0, which GRBL never sends.
    Error(u8),
    /// `ALARM:<n>`; the raw code
    Alarm(u8),
    /// Status report
    Status(StatusReport),
    /// Setting response (`$n=value`); key keeps its `$` prefix
    Setting {
        /// Setting key, e.g. `$110`.
        key: String,
        /// Raw value.
        value: String,
    },
    /// Bracketed feedback (`[MSG:..]`, `[GC:..]`, `[PRB:..]`)
    Message(String),
    /// Startup banner (`Grbl 1.1h ['$' for help]`)
    Welcome(String),
}

impl fmt::Display for GrblResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Error(code) => write!(f, "error:{}", code),
            Self::Alarm(code) => write!(f, "ALARM:{}", code),
            Self::Status(report) => write!(f, "{}", report),
            Self::Setting { key, value } => write!(f, "{}={}", key, value),
            Self::Message(msg) => write!(f, "{}", msg),
            Self::Welcome(banner) => write!(f, "{}", banner),
        }
    }
}

/// Parse a GRBL response line
///
/// Returns `Ok(None)` for blank lines.
pub fn parse_response(line: &str) -> Result<Option<GrblResponse>, DecodeError> {
    let line = line.trim();

    if line.is_empty() {
        return Ok(None);
    }

    if line == "ok" {
        return Ok(Some(GrblResponse::Ok));
    }

    if let Some(code) = line.strip_prefix("error:") {
        // Every error line answers exactly one sent line
        let code = parse_code(line, code).unwrap_or(0);
        return Ok(Some(GrblResponse::Error(code)));
    }

    if let Some(code) = line
        .get(..6)
        .filter(|prefix| prefix.eq_ignore_ascii_case("alarm:"))
        .and_then(|_| line.get(6..))
    {
        return parse_code(line, code).map(|c| Some(GrblResponse::Alarm(c)));
    }

    if line.starts_with('<') && line.ends_with('>') {
        return StatusReport::parse(line).map(|r| Some(GrblResponse::Status(r)));
    }

    if let Some(setting) = line.strip_prefix('$') {
        if let Some((key, value)) = setting.split_once('=') {
            let key = key.trim();
            if !key.is_empty() && key.chars().all(|c| c.is_ascii_digit()) {
                return Ok(Some(GrblResponse::Setting {
                    key: format!("${}", key),
                    value: value.trim().to_string(),
                }));
            }
        }
    }

    if line.starts_with('[') && line.ends_with(']') {
        return Ok(Some(GrblResponse::Message(line.to_string())));
    }

    if line.starts_with("Grbl ") {
        return Ok(Some(GrblResponse::Welcome(line.to_string())));
    }

    Err(DecodeError::Unrecognized(line.to_string()))
}

fn parse_code(line: &str, code: &str) -> Result<u8, DecodeError> {
    code.trim()
        .parse::<u8>()
        .map_err(|_| DecodeError::Unrecognized(line.to_string()))
}
