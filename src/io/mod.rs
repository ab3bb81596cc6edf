// src/io/mod.rs
//
// Byte source abstraction and the receive/transmit plumbing around it.
//
// A `ByteSource` is a raw, byte-oriented link (a serial port or an in-memory
// virtual device). The framer is its only reader; the transmit queue is its
// only writer. Both reach it through a `SharedSource`.

mod error;
pub mod memory;
pub mod serial;
mod types;

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

pub use error::IoError;
pub use memory::{MemoryHandle, MemorySource};
pub use types::{
    EventReceiver, EventSender, HarnessEvent, Message, SourceMessage, TransmitOrigin,
    TransmitRequest, TransmitSender,
};

/// Raw byte link consumed by the framer and the transmit queue.
///
/// `read` must return within a bounded wait (about 100 ms at most); a source
/// that blocks indefinitely breaks silence-based framing.
pub trait ByteSource: Send {
    /// Device label used in logs and errors
    fn name(&self) -> &str;

    fn connect(&mut self) -> Result<(), IoError>;

    fn disconnect(&mut self);

    /// Read up to `max` bytes. An empty vector means nothing was available.
    fn read(&mut self, max: usize) -> Result<Vec<u8>, IoError>;

    /// Write all of `data`, returning the number of bytes written.
    fn write(&mut self, data: &[u8]) -> Result<usize, IoError>;

    /// Bytes waiting in the receive buffer
    fn bytes_available(&self) -> Result<usize, IoError>;

    fn is_connected(&self) -> bool;

    /// Discard bytes waiting in the receive buffer.
    fn clear_input(&mut self) -> Result<(), IoError> {
        Ok(())
    }

    /// Change the link bit rate. Sources without a physical rate ignore it.
    fn set_bit_rate(&mut self, _bit_rate: u32) -> Result<(), IoError> {
        Ok(())
    }
}

/// Source shared between the receive loop and the transmit queue
pub type SharedSource = Arc<Mutex<Box<dyn ByteSource>>>;

pub fn share<S: ByteSource + 'static>(source: S) -> SharedSource {
    Arc::new(Mutex::new(Box::new(source)))
}

/// Current time in microseconds since the Unix epoch
pub fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Lifecycle of a harness session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IOState {
    Stopped,
    Starting,
    Running,
    Error(String),
}
