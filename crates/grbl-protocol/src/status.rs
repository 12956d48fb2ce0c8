//! Status report decoding
//!
//! Grbl 1.1 answers the `?` realtime request with a bracketed, pipe-separated line:
//!
//! ```text
//! <Run|WPos:12.000,-3.500,0.000|FS:1500,800|Ov:100,100,100>
//! ```
//!
//! Only the machine-state field (always first) and the `WPos:` field are decoded; every
//! other field is ignored. Firmware configured to report `MPos:` instead has no work
//! position and decodes to [`ProtocolError::MissingField`].

use crate::ProtocolError;
use std::fmt;
use std::str::FromStr;

const WORK_POSITION_FIELD: &str = "WPos";

/// Machine state (first field of a status report)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum MachineState {
    Idle,
    Run,
    /// Feed hold; sub-state 0 = complete, 1 = in progress
    Hold(u8),
    Jog,
    Alarm,
    /// Safety door; sub-state 0..=3
    Door(u8),
    Check,
    Home,
    Sleep,
}

impl MachineState {
    pub fn is_idle(&self) -> bool {
        matches!(self, MachineState::Idle)
    }
}

impl FromStr for MachineState {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, sub) = match s.split_once(':') {
            Some((name, sub)) => (name, Some(sub)),
            None => (s, None),
        };
        let sub_state = || -> Result<u8, ProtocolError> {
            sub.map_or(Ok(0), |v| {
                v.parse::<u8>().map_err(|_| ProtocolError::UnknownState(s.to_string()))
            })
        };

        match name.to_ascii_lowercase().as_str() {
            "idle" => Ok(MachineState::Idle),
            "run" => Ok(MachineState::Run),
            "hold" => Ok(MachineState::Hold(sub_state()?)),
            "jog" => Ok(MachineState::Jog),
            "alarm" => Ok(MachineState::Alarm),
            "door" => Ok(MachineState::Door(sub_state()?)),
            "check" => Ok(MachineState::Check),
            "home" => Ok(MachineState::Home),
            "sleep" => Ok(MachineState::Sleep),
            _ => Err(ProtocolError::UnknownState(s.to_string())),
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachineState::Idle => write!(f, "Idle"),
            MachineState::Run => write!(f, "Run"),
            MachineState::Hold(n) => write!(f, "Hold:{n}"),
            MachineState::Jog => write!(f, "Jog"),
            MachineState::Alarm => write!(f, "Alarm"),
            MachineState::Door(n) => write!(f, "Door:{n}"),
            MachineState::Check => write!(f, "Check"),
            MachineState::Home => write!(f, "Home"),
            MachineState::Sleep => write!(f, "Sleep"),
        }
    }
}

/// Work position, X and Y only (mm)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkPosition {
    pub x: f64,
    pub y: f64,
}

/// Decoded status report
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusReport {
    pub state: MachineState,
    pub work_position: WorkPosition,
}

/// Decode a `<...>` status line
pub fn decode_status(line: &str) -> Result<StatusReport, ProtocolError> {
    let body = line
        .trim()
        .strip_prefix('<')
        .and_then(|s| s.strip_suffix('>'))
        .ok_or_else(|| ProtocolError::NotAStatusReport(line.to_string()))?;

    let mut fields = body.split('|');
    let state = fields
        .next()
        .filter(|s| !s.is_empty())
        .ok_or(ProtocolError::MissingField("state"))?
        .parse::<MachineState>()?;

    let wpos = fields
        .find_map(|field| {
            let (name, value) = field.split_once(':')?;
            name.eq_ignore_ascii_case(WORK_POSITION_FIELD).then_some(value)
        })
        .ok_or(ProtocolError::MissingField(WORK_POSITION_FIELD))?;

    let coords = wpos
        .split(',')
        .map(|c| c.trim().parse::<f64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid_position(wpos))?;
    let &[x, y, ..] = coords.as_slice() else {
        return Err(invalid_position(wpos));
    };

    Ok(StatusReport {
        state,
        work_position: WorkPosition { x, y },
    })
}

fn invalid_position(value: &str) -> ProtocolError {
    ProtocolError::InvalidNumber {
        field: WORK_POSITION_FIELD,
        value: value.to_string(),
    }
}
