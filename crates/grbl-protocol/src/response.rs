//! Response classification
//!
//! Every line read from the controller is one of:
//!
//! - `ok` (case-insensitive): the oldest in-flight block was accepted
//! - `error:N`: the oldest in-flight block was rejected
//! - `<...>` status report containing a position field
//! - anything else: asynchronous device output (banner, `[MSG:..]`, `ALARM:N`, ...)
//!
//! Only `Ack` and `Error` release receive-buffer space; the other two never touch the
//! in-flight accounting.

use crate::ProtocolError;
use crate::errors::error_description;
use crate::status::{StatusReport, decode_status};
use std::fmt;

/// A rejected block, as reported by `error:N`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerError {
    /// Parsed error code; `None` when the line carries no integer after the separator
    pub code: Option<u16>,
    /// The line as received
    pub raw: String,
}

impl ControllerError {
    fn from_line(line: &str) -> Self {
        let code = line
            .split_once(':')
            .and_then(|(_, rest)| rest.trim().parse::<u16>().ok());
        Self {
            code,
            raw: line.to_string(),
        }
    }

    /// Known description of the code, if any
    pub fn description(&self) -> Option<&'static str> {
        self.code.and_then(error_description)
    }
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.description()) {
            (Some(code), Some(desc)) => write!(f, "{code} {desc}"),
            (Some(code), None) => write!(f, "{code}"),
            (None, _) => write!(f, "{}", self.raw),
        }
    }
}

/// Classified controller output
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerResponse {
    Ack,
    Error(ControllerError),
    Status(StatusReport),
    Other(String),
}

impl ControllerResponse {
    /// Whether this response consumes one in-flight block
    #[inline]
    pub fn releases_block(&self) -> bool {
        matches!(self, ControllerResponse::Ack | ControllerResponse::Error(_))
    }
}

/// Classify a line, surfacing malformed status reports as errors
///
/// A line that looks like a status report (contains `pos`) but cannot be decoded yields
/// the decoder's [`ProtocolError`]. Callers that must not stop on such lines should use
/// [`classify`] or map the error to [`ControllerResponse::Other`] themselves.
pub fn classify_strict(line: &str) -> Result<ControllerResponse, ProtocolError> {
    let text = line.trim();
    if text.eq_ignore_ascii_case("ok") {
        return Ok(ControllerResponse::Ack);
    }

    let lower = text.to_ascii_lowercase();
    if lower.contains("error") {
        return Ok(ControllerResponse::Error(ControllerError::from_line(text)));
    }
    if lower.contains("pos") {
        return decode_status(text).map(ControllerResponse::Status);
    }

    Ok(ControllerResponse::Other(text.to_string()))
}

/// Classify a line; malformed status reports become [`ControllerResponse::Other`]
pub fn classify(line: &str) -> ControllerResponse {
    classify_strict(line).unwrap_or_else(|_| ControllerResponse::Other(line.trim().to_string()))
}
