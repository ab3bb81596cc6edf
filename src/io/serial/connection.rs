// src/io/serial/connection.rs
//
// `ByteSource` backed by a physical or virtual serial port.
//
// Reads never block for long: the port is opened with a short timeout and
// `read` only pulls what `bytes_to_read` reports as waiting.

use serde::Serialize;
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use super::utils::{
    line_summary, to_serialport_data_bits, to_serialport_parity, to_serialport_stop_bits, Parity,
};
use crate::io::{ByteSource, IoError};

/// Port read timeout; bounds the wait inside `read`
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial port configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerialConfig {
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
}

impl SerialConfig {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        SerialConfig {
            port: port.into(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::None,
        }
    }
}

/// Information about an available serial port
#[derive(Clone, Debug, Serialize)]
pub struct SerialPortInfo {
    pub port_name: String,
    pub port_type: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
}

pub struct SerialConnection {
    config: SerialConfig,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialConnection {
    pub fn new(config: SerialConfig) -> Self {
        SerialConnection { config, port: None }
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Drop the port after an unrecoverable error.
    fn lose_connection(&mut self, message: String) -> IoError {
        tlog!("[serial] Connection to {} lost: {}", self.config.port, message);
        self.port = None;
        IoError::connection(&self.config.port, message)
    }
}

impl ByteSource for SerialConnection {
    fn name(&self) -> &str {
        &self.config.port
    }

    fn connect(&mut self) -> Result<(), IoError> {
        if self.port.is_some() {
            return Ok(());
        }
        let cfg = &self.config;
        let port = serialport::new(&cfg.port, cfg.baud_rate)
            .data_bits(to_serialport_data_bits(cfg.data_bits))
            .stop_bits(to_serialport_stop_bits(cfg.stop_bits))
            .parity(to_serialport_parity(cfg.parity))
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| IoError::connection(&cfg.port, e.to_string()))?;

        tlog!(
            "[serial] Opened {} at {} baud ({})",
            cfg.port,
            cfg.baud_rate,
            line_summary(cfg.data_bits, cfg.parity, cfg.stop_bits)
        );
        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            tlog!("[serial] Closed {}", self.config.port);
        }
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, IoError> {
        let Some(port) = self.port.as_mut() else {
            return Err(IoError::not_connected(&self.config.port));
        };

        let waiting = match port.bytes_to_read() {
            Ok(n) => n as usize,
            Err(e) => return Err(self.lose_connection(e.to_string())),
        };
        if waiting == 0 {
            return Ok(Vec::new());
        }

        let mut buf = vec![0u8; waiting.min(max)];
        match port.read(&mut buf) {
            Ok(0) => Err(self.lose_connection("end of stream".to_string())),
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(ref e) if e.kind() == ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::BrokenPipe | ErrorKind::NotConnected | ErrorKind::UnexpectedEof
                ) =>
            {
                Err(self.lose_connection(e.to_string()))
            }
            Err(e) => Err(IoError::read(&self.config.port, e.to_string())),
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, IoError> {
        let Some(port) = self.port.as_mut() else {
            return Err(IoError::not_connected(&self.config.port));
        };
        port.write_all(data)
            .and_then(|_| port.flush())
            .map_err(|e| match e.kind() {
                ErrorKind::TimedOut => IoError::timeout(&self.config.port, "write"),
                _ => IoError::write(&self.config.port, e.to_string()),
            })?;
        Ok(data.len())
    }

    fn bytes_available(&self) -> Result<usize, IoError> {
        let port = self
            .port
            .as_ref()
            .ok_or_else(|| IoError::not_connected(&self.config.port))?;
        port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(|e| IoError::connection(&self.config.port, e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn clear_input(&mut self) -> Result<(), IoError> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| IoError::not_connected(&self.config.port))?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| IoError::connection(&self.config.port, e.to_string()))
    }

    fn set_bit_rate(&mut self, bit_rate: u32) -> Result<(), IoError> {
        self.config.baud_rate = bit_rate;
        if let Some(port) = self.port.as_mut() {
            port.set_baud_rate(bit_rate)
                .map_err(|e| IoError::configuration(&self.config.port, e.to_string()))?;
        }
        Ok(())
    }
}

/// List available serial ports
///
/// On macOS, filters out /dev/tty.* devices and only shows /dev/cu.* devices.
/// The tty devices block on open waiting for carrier detect.
pub fn list_serial_ports() -> Result<Vec<SerialPortInfo>, String> {
    let ports =
        serialport::available_ports().map_err(|e| format!("Failed to enumerate ports: {}", e))?;

    Ok(ports
        .into_iter()
        .filter(|_p| {
            #[cfg(target_os = "macos")]
            {
                !_p.port_name.starts_with("/dev/tty.")
            }
            #[cfg(not(target_os = "macos"))]
            {
                true
            }
        })
        .map(|p| {
            let (port_type, manufacturer, product, serial_number, vid, pid) = match p.port_type {
                serialport::SerialPortType::UsbPort(info) => (
                    "USB".to_string(),
                    info.manufacturer,
                    info.product,
                    info.serial_number,
                    Some(info.vid),
                    Some(info.pid),
                ),
                serialport::SerialPortType::BluetoothPort => {
                    ("Bluetooth".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::PciPort => {
                    ("PCI".to_string(), None, None, None, None, None)
                }
                serialport::SerialPortType::Unknown => {
                    ("Unknown".to_string(), None, None, None, None, None)
                }
            };
            SerialPortInfo {
                port_name: p.port_name,
                port_type,
                manufacturer,
                product,
                serial_number,
                vid,
                pid,
            }
        })
        .collect())
}
