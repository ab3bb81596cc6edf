// src/io/types.rs
//
// Messages passed between the receive loop, the responder and the transmit
// queue, plus the events a session publishes to its UI/logging consumer.

use serde::Serialize;
use std::sync::mpsc as std_mpsc;
use tokio::sync::mpsc;

use super::error::IoError;

// ============================================================================
// Framed Messages
// ============================================================================

/// One reassembled unit of received bytes
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub bytes: Vec<u8>,
    /// Time the message was closed (µs since the Unix epoch)
    pub timestamp_us: u64,
}

impl Message {
    pub fn new(bytes: Vec<u8>) -> Self {
        Message {
            bytes,
            timestamp_us: super::now_us(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Output of the receive loop, in arrival order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceMessage {
    /// A complete message (silence boundary, stop flush or disconnect flush)
    Message(Message),
    /// Transient read failure; the loop keeps running
    Error(String),
    /// Loop finished: "stopped", "disconnected" or "error"
    Ended(String),
}

// ============================================================================
// Transmit Types
// ============================================================================

/// Who asked for a transmission (shown in TX log lines)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum TransmitOrigin {
    /// Direct send from the user / CLI
    Manual,
    /// Auto-response of the named sequence
    Sequence(String),
}

/// Transmit request sent through the queue
pub struct TransmitRequest {
    /// Bytes to write, already encoded
    pub data: Vec<u8>,
    pub origin: TransmitOrigin,
    /// Optional channel for the write result; fire-and-forget when `None`
    pub result_tx: Option<std_mpsc::SyncSender<Result<usize, IoError>>>,
}

/// Sender side of the transmit queue (sync-safe, usable from timers and
/// blocking threads)
pub type TransmitSender = std_mpsc::SyncSender<TransmitRequest>;

// ============================================================================
// Session Events
// ============================================================================

/// Notifications published by a running harness
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HarnessEvent {
    /// Source opened and receive loop started
    Connected { device: String },
    /// A framed message arrived
    Received { message: Message },
    /// A sequence matched the last received message
    Matched {
        sequence: String,
        comment: Option<String>,
    },
    /// Bytes were written to the device
    Transmitted { origin: TransmitOrigin, bytes: Vec<u8> },
    /// Non-fatal failure (read, encode, write, config)
    Error { message: String },
    /// Receive loop finished
    Ended { reason: String },
}

pub type EventSender = mpsc::UnboundedSender<HarnessEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<HarnessEvent>;
