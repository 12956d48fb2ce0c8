//! Driver error types

use grbl_protocol::{ControllerError, ProtocolError};
use grbl_serial::SerialError;
use std::time::Duration;
use thiserror::Error;

/// Driver error
///
/// Everything except [`DriverError::Protocol`] ends the run; see [`DriverError::is_fatal`].
#[derive(Error, Debug)]
pub enum DriverError {
    /// Transport failure (open/read/write)
    #[error("Serial error: {0}")]
    Serial(#[from] SerialError),

    /// Malformed controller output
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// `error:N` responses reached the abort threshold
    #[error("Too many controller errors: {count} (threshold {threshold})")]
    TooManyErrors { count: u32, threshold: u32 },

    /// A line command outside the program was rejected
    #[error("Controller rejected {command}: {error}")]
    Rejected {
        command: String,
        error: ControllerError,
    },

    /// Invalid run configuration, detected before the run starts
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Block can never fit in the receive buffer
    #[error("Block of {len} bytes exceeds receive buffer limit of {limit} bytes")]
    BlockTooLong { len: usize, limit: usize },

    /// No data from the controller within the read timeout
    #[error("Link stalled: no data for {0:?}")]
    Stalled(Duration),

    /// IO threads exited
    #[error("Link channel closed")]
    ChannelClosed,

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Handshake failed: {0}")]
    Handshake(String),
}

impl DriverError {
    /// Whether the run must stop
    pub fn is_fatal(&self) -> bool {
        !matches!(self, DriverError::Protocol(_))
    }
}
