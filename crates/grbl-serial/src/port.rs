//! `serialport`-backed adapter
//!
//! The port is opened with a short read timeout: the RX thread polls it and checks its
//! run flag between reads. Stall detection (no data for several seconds) belongs to the
//! link layer, not here.
//!
//! # Example
//!
//! ```no_run
//! use grbl_serial::{SerialAdapter, SerialPortAdapter};
//! use std::time::Duration;
//!
//! let mut port = SerialPortAdapter::open("/dev/ttyUSB0", 115_200, Duration::from_millis(100))?;
//! port.write(b"?")?;
//! let line = port.read_line()?;
//! # Ok::<(), grbl_serial::SerialError>(())
//! ```

use crate::{LineBuffer, RxAdapter, SerialAdapter, SerialError, SplittableAdapter, TxAdapter};
use serialport::{ClearBuffer, SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, trace};

const READ_CHUNK: usize = 256;

/// Serial port adapter (not yet split)
pub struct SerialPortAdapter {
    port: Box<dyn SerialPort>,
    buffer: LineBuffer,
    path: String,
}

impl SerialPortAdapter {
    /// Open `path` at `baud_rate`, 8N1, no flow control
    pub fn open(path: &str, baud_rate: u32, read_timeout: Duration) -> Result<Self, SerialError> {
        let port = serialport::new(path, baud_rate).timeout(read_timeout).open()?;
        debug!("Opened serial port {} at {} baud", path, baud_rate);
        Ok(Self {
            port,
            buffer: LineBuffer::new(),
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

fn read_line_from(
    port: &mut dyn SerialPort,
    buffer: &mut LineBuffer,
) -> Result<String, SerialError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(line) = buffer.next_line() {
            if let Ok(text) = &line {
                trace!("serial <- {:?}", text);
            }
            return line;
        }
        match port.read(&mut chunk) {
            Ok(0) => return Err(SerialError::Disconnected),
            Ok(n) => buffer.extend(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => return Err(SerialError::Timeout),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::BrokenPipe => return Err(SerialError::Disconnected),
            Err(e) => return Err(e.into()),
        }
    }
}

fn write_to(port: &mut dyn SerialPort, bytes: &[u8]) -> Result<(), SerialError> {
    trace!("serial -> {:?}", String::from_utf8_lossy(bytes));
    port.write_all(bytes)?;
    port.flush()?;
    Ok(())
}

impl SerialAdapter for SerialPortAdapter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        write_to(self.port.as_mut(), bytes)
    }

    fn read_line(&mut self) -> Result<String, SerialError> {
        read_line_from(self.port.as_mut(), &mut self.buffer)
    }

    fn bytes_waiting(&mut self) -> Result<usize, SerialError> {
        let in_driver = self.port.bytes_to_read()? as usize;
        Ok(in_driver + self.buffer.len())
    }

    fn clear_input(&mut self) -> Result<(), SerialError> {
        self.buffer.clear();
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), SerialError> {
        self.port.set_timeout(timeout)?;
        Ok(())
    }
}

impl SplittableAdapter for SerialPortAdapter {
    type RxAdapter = SerialRxAdapter;
    type TxAdapter = SerialTxAdapter;

    /// Split into independent read and write halves
    ///
    /// The write half is a cloned handle of the same device. Bytes already buffered by the
    /// adapter stay with the read half.
    fn split(self) -> Result<(Self::RxAdapter, Self::TxAdapter), SerialError> {
        let tx_port = self.port.try_clone()?;
        trace!("Serial port {} split into RX and TX halves", self.path);
        Ok((
            SerialRxAdapter {
                port: self.port,
                buffer: self.buffer,
            },
            SerialTxAdapter { port: tx_port },
        ))
    }
}

/// Read half of a split [`SerialPortAdapter`]
pub struct SerialRxAdapter {
    port: Box<dyn SerialPort>,
    buffer: LineBuffer,
}

impl RxAdapter for SerialRxAdapter {
    fn read_line(&mut self) -> Result<String, SerialError> {
        read_line_from(self.port.as_mut(), &mut self.buffer)
    }
}

/// Write half of a split [`SerialPortAdapter`]
pub struct SerialTxAdapter {
    port: Box<dyn SerialPort>,
}

impl TxAdapter for SerialTxAdapter {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SerialError> {
        write_to(self.port.as_mut(), bytes)
    }
}

/// A serial port present on this machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    /// Human readable description (USB product/manufacturer when known)
    pub description: String,
}

/// Serial ports present on this machine, in the order the OS reports them
pub fn available_ports() -> Result<Vec<PortInfo>, SerialError> {
    let ports = serialport::available_ports()?;
    Ok(ports
        .into_iter()
        .map(|p| PortInfo {
            description: describe(&p.port_type),
            name: p.port_name,
        })
        .collect())
}

fn describe(port_type: &SerialPortType) -> String {
    match port_type {
        SerialPortType::UsbPort(usb) => {
            let product = usb.product.as_deref().unwrap_or("USB serial");
            match usb.manufacturer.as_deref() {
                Some(vendor) => format!("{product} ({vendor}) [{:04x}:{:04x}]", usb.vid, usb.pid),
                None => format!("{product} [{:04x}:{:04x}]", usb.vid, usb.pid),
            }
        },
        SerialPortType::PciPort => "PCI serial".to_string(),
        SerialPortType::BluetoothPort => "Bluetooth serial".to_string(),
        SerialPortType::Unknown => "unknown".to_string(),
    }
}
