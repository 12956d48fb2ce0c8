//! # Grbl Protocol
//!
//! Grbl 1.1 serial protocol definitions (no hardware dependency).
//!
//! ## Modules
//!
//! - `block`: raw program line -> normalized block sent on the wire
//! - `gcode`: operand tokenizer, motion metadata, power/feed substitution
//! - `response`: classification of lines read back from the controller
//! - `status`: decoder for bracketed `<...>` status reports
//! - `errors`: static table of `error:N` descriptions
//! - `realtime`: single-byte realtime commands and line commands
//!
//! ## Wire format
//!
//! Every command block travels as ASCII terminated by `\n`. Grbl answers each block with
//! exactly one `ok` or `error:N`, in send order. Status reports (`<Idle|WPos:...|FS:0,0>`)
//! and device messages (`[MSG:...]`, `ALARM:N`, the start-up banner) arrive interleaved
//! on the same stream.

pub mod block;
pub mod errors;
pub mod gcode;
pub mod realtime;
pub mod response;
pub mod status;

pub use block::{COMMENT_MARKER, StreamBlock, normalize};
pub use errors::error_description;
pub use gcode::{Motion, MotionKind, Substitution, Word, is_xy_rapid, parse, tokenize};
pub use realtime::{LineCommand, RealtimeCommand};
pub use response::{ControllerError, ControllerResponse, classify, classify_strict};
pub use status::{MachineState, StatusReport, WorkPosition, decode_status};

use thiserror::Error;

/// Protocol parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Status report is missing field {0}")]
    MissingField(&'static str),

    #[error("Invalid number in field {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Unknown machine state: {0:?}")]
    UnknownState(String),

    #[error("Not a status report: {0:?}")]
    NotAStatusReport(String),

    #[error("Invalid g-code word at byte {position} in {block:?}")]
    InvalidWord { block: String, position: usize },
}
