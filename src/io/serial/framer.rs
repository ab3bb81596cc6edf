// src/io/serial/framer.rs
//
// Silence-based message framing.
//
// The link carries no length field and no delimiter, so a message is
// considered complete once the line has been idle for three character times
// at the configured bit rate (clamped to 5-200 ms). `SilenceFramer` holds the
// boundary logic with caller-supplied timestamps; `AdaptiveFramer` drives it
// from a blocking receive loop over a `SharedSource`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::io::{Message, SharedSource, SourceMessage};

// =============================================================================
// Timing Constants
// =============================================================================

/// Start bit + 8 data bits + stop bit
pub const BITS_PER_BYTE: f64 = 10.0;
/// Idle character times that close a message
pub const SILENCE_CHARACTERS: f64 = 3.0;
pub const MIN_TIMEOUT: Duration = Duration::from_millis(5);
pub const MAX_TIMEOUT: Duration = Duration::from_millis(200);
/// Used when neither a bit rate nor a manual timeout is configured
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(50);

/// Sleep when a read returns nothing
const IDLE_SLEEP: Duration = Duration::from_millis(1);
/// Backoff after a transient read error
const ERROR_BACKOFF: Duration = Duration::from_millis(10);
/// Largest single read
const READ_CHUNK: usize = 1024;

/// Silence timeout for `bit_rate`, or `None` for a zero rate.
pub fn timeout_for_bit_rate(bit_rate: u32) -> Option<Duration> {
    if bit_rate == 0 {
        return None;
    }
    let char_time = BITS_PER_BYTE / bit_rate as f64;
    let timeout = Duration::from_secs_f64(char_time * SILENCE_CHARACTERS);
    Some(timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT))
}

// =============================================================================
// Silence Framer (pure state machine)
// =============================================================================

/// Byte accumulator closed by inter-byte silence.
#[derive(Debug)]
pub struct SilenceFramer {
    buffer: Vec<u8>,
    last_arrival: Option<Instant>,
    timeout: Duration,
}

impl SilenceFramer {
    pub fn new(timeout: Duration) -> Self {
        SilenceFramer {
            buffer: Vec::new(),
            last_arrival: None,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the timeout. Buffered bytes are kept.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn silence_elapsed(&self, now: Instant) -> bool {
        self.last_arrival
            .is_some_and(|t| now.saturating_duration_since(t) >= self.timeout)
    }

    /// Append a chunk that arrived at `now`.
    ///
    /// If the silence before this chunk already reached the timeout (the loop
    /// was late to poll), the previous message is closed first and returned.
    pub fn feed(&mut self, data: &[u8], now: Instant) -> Option<Vec<u8>> {
        if data.is_empty() {
            return None;
        }
        let completed = if !self.buffer.is_empty() && self.silence_elapsed(now) {
            self.flush()
        } else {
            None
        };
        self.buffer.extend_from_slice(data);
        self.last_arrival = Some(now);
        completed
    }

    /// Close the buffer if the line has been silent for the timeout.
    pub fn poll(&mut self, now: Instant) -> Option<Vec<u8>> {
        if !self.buffer.is_empty() && self.silence_elapsed(now) {
            self.flush()
        } else {
            None
        }
    }

    /// Close the buffer regardless of elapsed silence.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        self.last_arrival = None;
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

// =============================================================================
// Adaptive Framer (receive loop driver)
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct FramerTiming {
    timeout: Duration,
    /// Recompute `timeout` when the bit rate changes
    auto: bool,
    bit_rate: Option<u32>,
}

/// Receive loop that turns a byte source into silence-delimited messages.
pub struct AdaptiveFramer {
    timing: Arc<Mutex<FramerTiming>>,
    cancel_flag: Arc<AtomicBool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl AdaptiveFramer {
    /// A manual timeout wins over a bit rate; with neither, 50 ms manual.
    pub fn new(bit_rate: Option<u32>, manual_timeout: Option<Duration>) -> Self {
        let timing = match (manual_timeout, bit_rate.and_then(timeout_for_bit_rate)) {
            (Some(timeout), _) => FramerTiming {
                timeout,
                auto: false,
                bit_rate,
            },
            (None, Some(timeout)) => FramerTiming {
                timeout,
                auto: true,
                bit_rate,
            },
            (None, None) => FramerTiming {
                timeout: DEFAULT_TIMEOUT,
                auto: false,
                bit_rate,
            },
        };

        AdaptiveFramer {
            timing: Arc::new(Mutex::new(timing)),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            task_handle: None,
        }
    }

    fn with_timing<R>(&self, f: impl FnOnce(&mut FramerTiming) -> R) -> R {
        match self.timing.lock() {
            Ok(mut guard) => f(&mut guard),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.with_timing(|t| t.timeout)
    }

    pub fn is_auto(&self) -> bool {
        self.with_timing(|t| t.auto)
    }

    pub fn bit_rate(&self) -> Option<u32> {
        self.with_timing(|t| t.bit_rate)
    }

    /// Record a new bit rate; the timeout follows only in auto mode.
    pub fn set_bit_rate(&self, bit_rate: u32) {
        let Some(derived) = timeout_for_bit_rate(bit_rate) else {
            tlog!("[framer] Ignoring bit rate 0");
            return;
        };
        self.with_timing(|t| {
            t.bit_rate = Some(bit_rate);
            if t.auto {
                tlog!(
                    "[framer] Timeout for {} bit/s: {:.1}ms -> {:.1}ms",
                    bit_rate,
                    t.timeout.as_secs_f64() * 1000.0,
                    derived.as_secs_f64() * 1000.0
                );
                t.timeout = derived;
            }
        });
    }

    /// Set the timeout explicitly. With `auto`, later bit-rate changes
    /// recompute it again.
    pub fn set_timeout(&self, timeout: Duration, auto: bool) {
        self.with_timing(|t| {
            t.timeout = timeout;
            t.auto = auto;
        });
        tlog!(
            "[framer] Timeout set to {:.1}ms (auto: {})",
            timeout.as_secs_f64() * 1000.0,
            auto
        );
    }

    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawn the receive loop. Messages, read errors and the final `Ended`
    /// are sent to `tx` in order. Must be called inside a Tokio runtime.
    pub fn start(
        &mut self,
        source: SharedSource,
        tx: mpsc::Sender<SourceMessage>,
    ) -> Result<(), String> {
        if self.is_running() {
            return Err("Framer is already running".to_string());
        }

        self.cancel_flag = Arc::new(AtomicBool::new(false));
        let cancel_flag = self.cancel_flag.clone();
        let timing = self.timing.clone();

        tlog!(
            "[framer] Starting with {:.1}ms timeout",
            self.timeout().as_secs_f64() * 1000.0
        );

        self.task_handle = Some(tokio::task::spawn_blocking(move || {
            run_receive_loop(source, timing, cancel_flag, tx)
        }));
        Ok(())
    }

    /// Stop the loop and wait for it to exit. Buffered bytes are delivered as
    /// a final message before `Ended`. Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancel_flag.store(true, Ordering::Release);
        if let Some(handle) = self.task_handle.take() {
            if let Err(e) = handle.await {
                tlog!("[framer] Receive loop panicked: {:?}", e);
            }
        }
    }
}

impl Drop for AdaptiveFramer {
    fn drop(&mut self) {
        self.cancel_flag.store(true, Ordering::Release);
    }
}

fn current_timeout(timing: &Mutex<FramerTiming>) -> Duration {
    match timing.lock() {
        Ok(guard) => guard.timeout,
        Err(poisoned) => poisoned.into_inner().timeout,
    }
}

/// Blocking receive loop
fn run_receive_loop(
    source: SharedSource,
    timing: Arc<Mutex<FramerTiming>>,
    cancel_flag: Arc<AtomicBool>,
    tx: mpsc::Sender<SourceMessage>,
) {
    let mut framer = SilenceFramer::new(current_timeout(&timing));
    let mut receive_count: u64 = 0;

    let deliver = |bytes: Vec<u8>| -> bool {
        tlog!("[framer] Message complete ({} bytes)", bytes.len());
        tx.blocking_send(SourceMessage::Message(Message::new(bytes)))
            .is_ok()
    };

    tlog!("[framer] Receive loop started");

    let reason = loop {
        if cancel_flag.load(Ordering::Acquire) {
            break "stopped";
        }

        framer.set_timeout(current_timeout(&timing));

        if let Some(bytes) = framer.poll(Instant::now()) {
            if !deliver(bytes) {
                break "closed";
            }
        }

        let read_result = match source.lock() {
            Ok(mut src) => {
                if !src.is_connected() {
                    tlog!("[framer] Connection lost, exiting loop");
                    break "disconnected";
                }
                src.read(READ_CHUNK)
            }
            Err(e) => {
                tlog!("[framer] Source mutex poisoned: {}", e);
                break "error";
            }
        };

        match read_result {
            Ok(data) if !data.is_empty() => {
                receive_count += 1;
                let completed = framer.feed(&data, Instant::now());
                tlog!(
                    "[framer] [{}] Received {} bytes, buffer now {} bytes",
                    receive_count,
                    data.len(),
                    framer.buffered()
                );
                if let Some(bytes) = completed {
                    if !deliver(bytes) {
                        break "closed";
                    }
                }
            }
            Ok(_) => std::thread::sleep(IDLE_SLEEP),
            Err(e) if e.is_disconnect() => {
                tlog!("[framer] {}, exiting loop", e);
                break "disconnected";
            }
            Err(e) => {
                tlog!("[framer] Error reading data: {}", e);
                if tx.blocking_send(SourceMessage::Error(e.to_string())).is_err() {
                    break "closed";
                }
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    };

    if let Some(bytes) = framer.flush() {
        tlog!("[framer] Flushing {} buffered bytes", bytes.len());
        deliver(bytes);
    }

    tlog!("[framer] Receive loop ended ({})", reason);
    let _ = tx.blocking_send(SourceMessage::Ended(reason.to_string()));
}
