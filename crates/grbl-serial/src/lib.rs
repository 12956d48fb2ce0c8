//! # Grbl Serial Adapter Layer
//!
//! Transport abstraction for a line-oriented serial link: raw bytes out, `\n`-terminated
//! lines in. Nothing here knows about g-code; classification happens in `grbl-protocol`.
//!
//! An adapter is opened, used directly for the start-up handshake, then split into a read
//! half and a write half so that one thread owns each direction.

use std::time::Duration;
use thiserror::Error;

pub mod port;

pub use port::{PortInfo, SerialPortAdapter, SerialRxAdapter, SerialTxAdapter, available_ports};

#[cfg(feature = "mock")]
pub mod mock;

/// Default baud rate of Grbl 1.1
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Serial adapter error
#[derive(Error, Debug)]
pub enum SerialError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),
    #[error("Read timeout")]
    Timeout,
    #[error("Device disconnected")]
    Disconnected,
    #[error("Received line is not valid UTF-8")]
    InvalidUtf8,
}

impl SerialError {
    /// Timeouts are part of normal polling and a garbled line only loses that line;
    /// everything else ends the link
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SerialError::Timeout | SerialError::InvalidUtf8)
    }
}

pub trait SerialAdapter {
    /// Write all bytes; fire-and-forget, no write timeout
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError>;

    /// Read one line without its terminator
    ///
    /// Blocks until a full line arrives or the read timeout elapses
    /// ([`SerialError::Timeout`]).
    fn read_line(&mut self) -> Result<String, SerialError>;

    /// Bytes received but not yet returned by [`read_line`](Self::read_line)
    fn bytes_waiting(&mut self) -> Result<usize, SerialError>;

    /// Discard everything received so far
    fn clear_input(&mut self) -> Result<(), SerialError>;

    fn set_read_timeout(&mut self, _timeout: Duration) -> Result<(), SerialError> {
        Ok(())
    }

    fn try_read_line(&mut self) -> Result<Option<String>, SerialError> {
        match self.read_line() {
            Ok(line) => Ok(Some(line)),
            Err(SerialError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

pub trait RxAdapter {
    fn read_line(&mut self) -> Result<String, SerialError>;
}

pub trait TxAdapter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError>;
}

pub trait SplittableAdapter: SerialAdapter {
    type RxAdapter: RxAdapter;
    type TxAdapter: TxAdapter;
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), SerialError>;
}

/// Incremental `\n` line splitter shared by adapters
///
/// `\r` is dropped from line ends so `ok\r\n` and `ok\n` read the same.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete line, if any
    pub fn next_line(&mut self) -> Option<Result<String, SerialError>> {
        let idx = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=idx).collect();
        line.pop();
        while line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8(line).map_err(|_| SerialError::InvalidUtf8))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_buffer_splits_lines() {
        let mut buf = LineBuffer::new();
        buf.extend(b"ok\r\nerror:2");
        assert_eq!(buf.next_line().unwrap().unwrap(), "ok");
        assert!(buf.next_line().is_none());
        assert_eq!(buf.len(), 7);

        buf.extend(b"2\n<Idle|WPos:0,0,0>\n");
        assert_eq!(buf.next_line().unwrap().unwrap(), "error:22");
        assert_eq!(buf.next_line().unwrap().unwrap(), "<Idle|WPos:0,0,0>");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_buffer_empty_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"\r\n");
        assert_eq!(buf.next_line().unwrap().unwrap(), "");
    }

    #[test]
    fn test_line_buffer_invalid_utf8() {
        let mut buf = LineBuffer::new();
        buf.extend(&[0xff, 0xfe, b'\n', b'o', b'k', b'\n']);
        assert!(matches!(buf.next_line(), Some(Err(SerialError::InvalidUtf8))));
        assert_eq!(buf.next_line().unwrap().unwrap(), "ok");
    }

    #[test]
    fn test_error_fatality() {
        assert!(!SerialError::Timeout.is_fatal());
        assert!(!SerialError::InvalidUtf8.is_fatal());
        assert!(SerialError::Disconnected.is_fatal());
    }

    #[test]
    fn test_error_display() {
        assert_eq!(SerialError::Timeout.to_string(), "Read timeout");
        let io = SerialError::from(std::io::Error::other("boom"));
        assert!(io.to_string().contains("boom"));
    }
}
