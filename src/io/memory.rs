// src/io/memory.rs
//
// In-memory byte source.
//
// Acts as a virtual device: a `MemoryHandle` pushes inbound bytes, inspects
// what was written, injects read errors and simulates unplugging. Used by the
// tests and by demos that run the harness without hardware.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ByteSource, IoError};

#[derive(Debug, Default)]
struct MemoryState {
    inbound: VecDeque<u8>,
    written: Vec<Vec<u8>>,
    connected: bool,
    read_errors: VecDeque<String>,
    bit_rate: Option<u32>,
}

#[derive(Debug)]
pub struct MemorySource {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

/// Control side of a `MemorySource`
#[derive(Debug, Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemorySource {
    /// Create a connected in-memory source and its control handle.
    pub fn new(name: impl Into<String>) -> (Self, MemoryHandle) {
        let state = Arc::new(Mutex::new(MemoryState {
            connected: true,
            ..MemoryState::default()
        }));
        (
            MemorySource {
                name: name.into(),
                state: state.clone(),
            },
            MemoryHandle { state },
        )
    }
}

impl ByteSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn connect(&mut self) -> Result<(), IoError> {
        lock(&self.state).connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        lock(&self.state).connected = false;
    }

    fn read(&mut self, max: usize) -> Result<Vec<u8>, IoError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(IoError::not_connected(&self.name));
        }
        if let Some(message) = state.read_errors.pop_front() {
            return Err(IoError::read(&self.name, message));
        }
        let n = max.min(state.inbound.len());
        Ok(state.inbound.drain(..n).collect())
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, IoError> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(IoError::not_connected(&self.name));
        }
        state.written.push(data.to_vec());
        Ok(data.len())
    }

    fn bytes_available(&self) -> Result<usize, IoError> {
        Ok(lock(&self.state).inbound.len())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn clear_input(&mut self) -> Result<(), IoError> {
        lock(&self.state).inbound.clear();
        Ok(())
    }

    fn set_bit_rate(&mut self, bit_rate: u32) -> Result<(), IoError> {
        lock(&self.state).bit_rate = Some(bit_rate);
        Ok(())
    }
}

impl MemoryHandle {
    /// Queue bytes for the reader.
    pub fn push(&self, bytes: &[u8]) {
        lock(&self.state).inbound.extend(bytes.iter().copied());
    }

    /// Bytes pushed but not yet read
    pub fn pending(&self) -> usize {
        lock(&self.state).inbound.len()
    }

    /// Every write, one entry per `write` call
    pub fn written(&self) -> Vec<Vec<u8>> {
        lock(&self.state).written.clone()
    }

    pub fn take_written(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut lock(&self.state).written)
    }

    /// Make the next `read` fail with a transient error.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        lock(&self.state).read_errors.push_back(message.into());
    }

    /// Simulate the device going away.
    pub fn unplug(&self) {
        lock(&self.state).connected = false;
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    pub fn bit_rate(&self) -> Option<u32> {
        lock(&self.state).bit_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_respects_max() {
        let (mut source, handle) = MemorySource::new("mem");
        handle.push(b"HELLO");
        assert_eq!(source.bytes_available().unwrap(), 5);
        assert_eq!(source.read(3).unwrap(), b"HEL".to_vec());
        assert_eq!(source.read(16).unwrap(), b"LO".to_vec());
        assert!(source.read(16).unwrap().is_empty());
    }

    #[test]
    fn test_write_is_recorded() {
        let (mut source, handle) = MemorySource::new("mem");
        assert_eq!(source.write(b"ACK").unwrap(), 3);
        assert_eq!(handle.written(), vec![b"ACK".to_vec()]);
        assert_eq!(handle.take_written().len(), 1);
        assert!(handle.written().is_empty());
    }

    #[test]
    fn test_injected_read_error_is_transient() {
        let (mut source, handle) = MemorySource::new("mem");
        handle.push(b"A");
        handle.fail_next_read("overrun");
        let err = source.read(8).unwrap_err();
        assert!(!err.is_disconnect());
        assert_eq!(source.read(8).unwrap(), b"A".to_vec());
    }

    #[test]
    fn test_clear_input_drops_pending_bytes() {
        let (mut source, handle) = MemorySource::new("mem");
        handle.push(b"stale");
        source.clear_input().unwrap();
        assert_eq!(handle.pending(), 0);
        assert!(source.read(8).unwrap().is_empty());
    }

    #[test]
    fn test_unplug() {
        let (mut source, handle) = MemorySource::new("mem");
        handle.unplug();
        assert!(!source.is_connected());
        assert!(source.read(8).unwrap_err().is_disconnect());
        assert!(source.write(b"x").is_err());
        source.connect().unwrap();
        assert!(handle.is_connected());
    }
}
