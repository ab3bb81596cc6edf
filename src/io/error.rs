// src/io/error.rs
//
// Typed transport errors for byte sources.
//
// Readers and the transmit queue return `IoError`; the session layer converts
// to `String` at the edge with `String::from` / `.to_string()`.

use thiserror::Error;

/// Error raised by a `ByteSource` or the transmit path.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    /// Could not open or lost the link to a device
    #[error("{device}: connection error: {message}")]
    Connection { device: String, message: String },

    /// Operation attempted while the source is disconnected
    #[error("{device}: not connected")]
    NotConnected { device: String },

    /// Transient read failure (the receive loop retries)
    #[error("{device}: read error: {message}")]
    Read { device: String, message: String },

    /// Write failure
    #[error("{device}: write error: {message}")]
    Write { device: String, message: String },

    /// Operation did not complete in time
    #[error("{device}: timed out during {operation}")]
    Timeout { device: String, operation: String },

    /// Invalid port configuration
    #[error("{device}: invalid configuration: {message}")]
    Configuration { device: String, message: String },
}

impl IoError {
    pub fn connection(device: &str, message: impl Into<String>) -> Self {
        IoError::Connection {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn not_connected(device: &str) -> Self {
        IoError::NotConnected {
            device: device.to_string(),
        }
    }

    pub fn read(device: &str, message: impl Into<String>) -> Self {
        IoError::Read {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn write(device: &str, message: impl Into<String>) -> Self {
        IoError::Write {
            device: device.to_string(),
            message: message.into(),
        }
    }

    pub fn timeout(device: &str, operation: impl Into<String>) -> Self {
        IoError::Timeout {
            device: device.to_string(),
            operation: operation.into(),
        }
    }

    pub fn configuration(device: &str, message: impl Into<String>) -> Self {
        IoError::Configuration {
            device: device.to_string(),
            message: message.into(),
        }
    }

    /// True when the link is gone and retrying is pointless.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, IoError::Connection { .. } | IoError::NotConnected { .. })
    }
}

impl From<IoError> for String {
    fn from(e: IoError) -> Self {
        e.to_string()
    }
}
