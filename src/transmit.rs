// src/transmit.rs
//
// Outbound path: a single transmit queue that owns every write to the source,
// and the scheduler that turns matched sequences into queued responses.
//
// Immediate responses, delayed responses and manual sends all go through the
// same `TransmitSender`, so writes never interleave on the wire.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;

use crate::codec::{format_bytes, ByteFormat};
use crate::io::{
    EventSender, HarnessEvent, IoError, SharedSource, TransmitOrigin, TransmitRequest,
    TransmitSender,
};
use crate::sequence::Sequence;

/// Queue depth before `try_send` reports the queue as full
const QUEUE_DEPTH: usize = 32;
/// How long the writer waits for a request before re-checking the cancel flag
const QUEUE_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// Transmitter
// ============================================================================

/// Blocking writer draining the transmit queue.
pub struct Transmitter {
    tx: TransmitSender,
    cancel_flag: Arc<AtomicBool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl Transmitter {
    /// Spawn the writer. Must be called inside a Tokio runtime.
    pub fn start(source: SharedSource, events: EventSender, display_format: ByteFormat) -> Self {
        let (tx, rx) = std_mpsc::sync_channel::<TransmitRequest>(QUEUE_DEPTH);
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let cancel = cancel_flag.clone();

        let task_handle = tokio::task::spawn_blocking(move || {
            run_transmit_loop(source, rx, cancel, events, display_format)
        });

        Transmitter {
            tx,
            cancel_flag,
            task_handle: Some(task_handle),
        }
    }

    pub fn sender(&self) -> TransmitSender {
        self.tx.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the writer. Requests still queued are dropped. Idempotent.
    pub async fn stop(&mut self) {
        self.cancel_flag.store(true, Ordering::Release);
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tlog!("[transmit] Writer panicked: {:?}", e);
            }
        }
    }
}

impl Drop for Transmitter {
    fn drop(&mut self) {
        self.cancel_flag.store(true, Ordering::Release);
    }
}

fn write_request(source: &SharedSource, data: &[u8]) -> Result<usize, IoError> {
    let mut src = match source.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if data.is_empty() {
        return Err(IoError::write(src.name(), "no bytes to transmit"));
    }
    src.write(data)
}

fn run_transmit_loop(
    source: SharedSource,
    rx: std_mpsc::Receiver<TransmitRequest>,
    cancel_flag: Arc<AtomicBool>,
    events: EventSender,
    display_format: ByteFormat,
) {
    loop {
        if cancel_flag.load(Ordering::Acquire) {
            break;
        }

        let req = match rx.recv_timeout(QUEUE_POLL) {
            Ok(req) => req,
            Err(std_mpsc::RecvTimeoutError::Timeout) => continue,
            Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
        };

        let result = write_request(&source, &req.data);
        match &result {
            Ok(n) => {
                tlog!(
                    "[transmit] TX {} ({} bytes): {}",
                    origin_label(&req.origin),
                    n,
                    format_bytes(display_format, &req.data)
                );
                let _ = events.send(HarnessEvent::Transmitted {
                    origin: req.origin.clone(),
                    bytes: req.data.clone(),
                });
            }
            Err(e) => {
                tlog!("[transmit] TX {} failed: {}", origin_label(&req.origin), e);
                let _ = events.send(HarnessEvent::Error {
                    message: format!("Transmit failed: {}", e),
                });
            }
        }

        if let Some(result_tx) = req.result_tx {
            let _ = result_tx.try_send(result);
        }
    }
    tlog!("[transmit] Writer stopped");
}

fn origin_label(origin: &TransmitOrigin) -> String {
    match origin {
        TransmitOrigin::Manual => "manual".to_string(),
        TransmitOrigin::Sequence(name) => format!("'{}'", name),
    }
}

/// Enqueue without blocking. Reports a full or closed queue as an error event.
pub fn queue(
    tx: &TransmitSender,
    events: &EventSender,
    data: Vec<u8>,
    origin: TransmitOrigin,
) -> bool {
    match tx.try_send(TransmitRequest {
        data,
        origin,
        result_tx: None,
    }) {
        Ok(()) => true,
        Err(e) => {
            let message = match e {
                std_mpsc::TrySendError::Full(_) => "Transmit queue full".to_string(),
                std_mpsc::TrySendError::Disconnected(_) => "Transmit queue closed".to_string(),
            };
            tlog!("[transmit] {}", message);
            let _ = events.send(HarnessEvent::Error { message });
            false
        }
    }
}

// ============================================================================
// Response Scheduling
// ============================================================================

/// What `ResponseScheduler::dispatch` did with a matched sequence
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    /// Encoded and queued now (byte count)
    Immediate(usize),
    /// Timer started; encoded when it fires
    Scheduled(Duration),
    /// Response encodes to no bytes
    Nothing,
    /// Encode or queue failure (already reported as an event)
    Failed(String),
}

/// Turns matches into queued responses, honouring each sequence's delay.
pub struct ResponseScheduler {
    transmit: TransmitSender,
    events: EventSender,
    pending: Mutex<Vec<AbortHandle>>,
}

impl ResponseScheduler {
    pub fn new(transmit: TransmitSender, events: EventSender) -> Self {
        ResponseScheduler {
            transmit,
            events,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Respond to a match. Delayed responses run on their own timer task, so
    /// this never blocks the caller. Must be called inside a Tokio runtime.
    pub fn dispatch(&self, sequence: Arc<Sequence>) -> Dispatch {
        let delay = sequence.delay();
        if delay.is_zero() {
            return send_response(&sequence, &self.transmit, &self.events);
        }

        tlog!(
            "[responder] '{}' scheduled in {}ms",
            sequence.name(),
            delay.as_millis()
        );
        let transmit = self.transmit.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            send_response(&sequence, &transmit, &events);
        });

        let mut pending = lock_pending(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.push(handle.abort_handle());
        Dispatch::Scheduled(delay)
    }

    /// Delayed responses that have not fired yet
    pub fn pending(&self) -> usize {
        let mut pending = lock_pending(&self.pending);
        pending.retain(|h| !h.is_finished());
        pending.len()
    }

    /// Abort every unfired delayed response. Returns how many were aborted.
    pub fn cancel_pending(&self) -> usize {
        let mut pending = lock_pending(&self.pending);
        let mut cancelled = 0;
        for handle in pending.drain(..) {
            if !handle.is_finished() {
                handle.abort();
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            tlog!("[responder] Cancelled {} pending responses", cancelled);
        }
        cancelled
    }
}

fn lock_pending(pending: &Mutex<Vec<AbortHandle>>) -> std::sync::MutexGuard<'_, Vec<AbortHandle>> {
    match pending.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn send_response(sequence: &Sequence, transmit: &TransmitSender, events: &EventSender) -> Dispatch {
    let bytes = match sequence.response_bytes() {
        Ok(bytes) => bytes,
        Err(e) => {
            let message = format!("Sequence '{}': cannot encode response: {}", sequence.name(), e);
            tlog!("[responder] {}", message);
            let _ = events.send(HarnessEvent::Error {
                message: message.clone(),
            });
            return Dispatch::Failed(message);
        }
    };
    if bytes.is_empty() {
        return Dispatch::Nothing;
    }

    let len = bytes.len();
    let origin = TransmitOrigin::Sequence(sequence.name().to_string());
    if queue(transmit, events, bytes, origin) {
        Dispatch::Immediate(len)
    } else {
        Dispatch::Failed("Transmit queue unavailable".to_string())
    }
}
