// src/harness.rs
//
// Session wiring: byte source -> framer -> responder -> transmit queue.
//
// A `Harness` owns one source. `start` connects it, spawns the receive loop
// and the writer, and pumps framed messages through the responder. Everything
// observable is published as `HarnessEvent`s.

use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::codec::{self, format_bytes, ByteFormat};
use crate::io::serial::{AdaptiveFramer, SerialConfig, SerialConnection};
use crate::io::{
    share, EventSender, HarnessEvent, IOState, IoError, SharedSource, SourceMessage,
    TransmitOrigin, TransmitRequest,
};
use crate::sequence::{LoadReport, ResponderEngine};
use crate::settings::HarnessSettings;
use crate::transmit::{ResponseScheduler, Transmitter};

/// Framed messages waiting for the responder
const MESSAGE_QUEUE_DEPTH: usize = 256;
/// How long `transmit` waits for the write result
const TRANSMIT_RESULT_TIMEOUT: Duration = Duration::from_millis(500);

pub struct Harness {
    source: SharedSource,
    device: String,
    engine: Arc<ResponderEngine>,
    framer: AdaptiveFramer,
    transmitter: Option<Transmitter>,
    scheduler: Option<Arc<ResponseScheduler>>,
    pump: Option<tokio::task::JoinHandle<()>>,
    events: EventSender,
    display_format: ByteFormat,
    state: Arc<Mutex<IOState>>,
}

impl Harness {
    pub fn new(
        source: SharedSource,
        engine: Arc<ResponderEngine>,
        framer: AdaptiveFramer,
        events: EventSender,
    ) -> Self {
        let device = match source.lock() {
            Ok(src) => src.name().to_string(),
            Err(poisoned) => poisoned.into_inner().name().to_string(),
        };
        Harness {
            source,
            device,
            engine,
            framer,
            transmitter: None,
            scheduler: None,
            pump: None,
            events,
            display_format: ByteFormat::default(),
            state: Arc::new(Mutex::new(IOState::Stopped)),
        }
    }

    /// Serial harness from settings. Sequences are loaded from
    /// `settings.sequences_path`; a broken file leaves the responder empty.
    pub fn from_settings(settings: &HarnessSettings, events: EventSender) -> Result<Self, String> {
        let port = settings
            .port
            .clone()
            .ok_or_else(|| "No serial port configured".to_string())?;

        let config = SerialConfig {
            port,
            baud_rate: settings.baud_rate,
            data_bits: settings.data_bits,
            stop_bits: settings.stop_bits,
            parity: settings.parity,
        };

        let engine = Arc::new(ResponderEngine::new());
        match engine.load_file(&settings.sequences_path) {
            Ok(report) => log_report(&report),
            Err(e) => {
                let _ = events.send(HarnessEvent::Error {
                    message: e.to_string(),
                });
            }
        }

        let framer = AdaptiveFramer::new(Some(settings.baud_rate), settings.message_timeout());
        let source = share(SerialConnection::new(config));
        Ok(Harness::new(source, engine, framer, events).with_display_format(settings.display_format))
    }

    /// Format used for RX/TX log lines.
    pub fn with_display_format(mut self, format: ByteFormat) -> Self {
        self.display_format = format;
        self
    }

    pub fn engine(&self) -> &Arc<ResponderEngine> {
        &self.engine
    }

    pub fn framer(&self) -> &AdaptiveFramer {
        &self.framer
    }

    /// Session state. Leaves `Running` when the receive loop ends on its own.
    pub fn state(&self) -> IOState {
        lock_state(&self.state).clone()
    }

    fn set_state(&self, state: IOState) {
        *lock_state(&self.state) = state;
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    /// Connect the source and start receiving. Must be called inside a Tokio
    /// runtime.
    pub fn start(&mut self) -> Result<(), String> {
        if self.state() == IOState::Running && self.framer.is_running() {
            return Err("Harness is already running".to_string());
        }
        self.set_state(IOState::Starting);

        let connected = match self.source.lock() {
            Ok(mut src) => src.connect(),
            Err(poisoned) => poisoned.into_inner().connect(),
        };
        if let Err(e) = connected {
            self.set_state(IOState::Error(e.to_string()));
            return Err(e.into());
        }

        // Bytes that arrived while nobody was listening are not a message
        let cleared = match self.source.lock() {
            Ok(mut src) => src.clear_input(),
            Err(poisoned) => poisoned.into_inner().clear_input(),
        };
        if let Err(e) = cleared {
            tlog!("[harness] Could not clear receive buffer on {}: {}", self.device, e);
        }

        if !self.transmitter.as_ref().is_some_and(|t| t.is_running()) {
            let transmitter =
                Transmitter::start(self.source.clone(), self.events.clone(), self.display_format);
            self.scheduler = Some(Arc::new(ResponseScheduler::new(
                transmitter.sender(),
                self.events.clone(),
            )));
            self.transmitter = Some(transmitter);
        }
        let Some(scheduler) = self.scheduler.clone() else {
            return Err("Transmit queue not available".to_string());
        };

        let (tx, rx) = mpsc::channel(MESSAGE_QUEUE_DEPTH);
        if let Err(e) = self.framer.start(self.source.clone(), tx) {
            self.set_state(IOState::Error(e.clone()));
            return Err(e);
        }

        self.set_state(IOState::Running);
        self.pump = Some(tokio::spawn(pump_messages(
            rx,
            self.engine.clone(),
            scheduler,
            self.events.clone(),
            self.state.clone(),
            self.display_format,
        )));

        tlog!("[harness] Started on {}", self.device);
        let _ = self.events.send(HarnessEvent::Connected {
            device: self.device.clone(),
        });
        Ok(())
    }

    /// Stop receiving. Buffered bytes are delivered (and matched) first.
    /// The transmit queue stays up so scheduled responses still go out.
    pub async fn stop(&mut self) {
        self.framer.stop().await;
        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                tlog!("[harness] Message pump panicked: {:?}", e);
            }
        }
        {
            let mut state = lock_state(&self.state);
            if *state == IOState::Running || *state == IOState::Starting {
                *state = IOState::Stopped;
            }
        }
    }

    /// Stop everything: receive loop, pending responses, writer and source.
    pub async fn shutdown(&mut self) {
        self.stop().await;
        self.cancel_pending_responses();
        if let Some(mut transmitter) = self.transmitter.take() {
            transmitter.stop().await;
        }
        self.scheduler = None;
        match self.source.lock() {
            Ok(mut src) => src.disconnect(),
            Err(poisoned) => poisoned.into_inner().disconnect(),
        }
        self.set_state(IOState::Stopped);
        tlog!("[harness] Shut down {}", self.device);
    }

    /// Write bytes through the transmit queue and wait for the result.
    pub async fn transmit(&self, data: Vec<u8>) -> Result<usize, String> {
        if data.is_empty() {
            return Err("No bytes to transmit".to_string());
        }
        let tx = self
            .transmitter
            .as_ref()
            .map(|t| t.sender())
            .ok_or("Not connected (no transmit queue)")?;

        let (result_tx, result_rx) = std_mpsc::sync_channel(1);
        tx.try_send(TransmitRequest {
            data,
            origin: TransmitOrigin::Manual,
            result_tx: Some(result_tx),
        })
        .map_err(|e| format!("Failed to queue transmit request: {}", e))?;

        let result = tokio::task::spawn_blocking(move || result_rx.recv_timeout(TRANSMIT_RESULT_TIMEOUT))
            .await
            .map_err(|e| format!("Transmit wait failed: {}", e))?
            .map_err(|e| match e {
                std_mpsc::RecvTimeoutError::Timeout => {
                    IoError::timeout(&self.device, "transmit").to_string()
                }
                std_mpsc::RecvTimeoutError::Disconnected => "Transmit queue closed".to_string(),
            })?;

        Ok(result?)
    }

    /// Encode `text` in `format` and transmit it.
    pub async fn send_text(&self, format: ByteFormat, text: &str) -> Result<usize, String> {
        let bytes = codec::encode(format, text).map_err(|e| e.to_string())?;
        self.transmit(bytes).await
    }

    /// Flip a sequence's active flag, returning the new state.
    pub fn toggle(&self, name: &str) -> Result<bool, String> {
        self.engine.toggle(name).map_err(|e| e.to_string())
    }

    /// Replace the sequence collection from a file.
    pub fn reload(&self, path: &Path) -> Result<LoadReport, String> {
        let report = self.engine.load_file(path).map_err(|e| e.to_string())?;
        log_report(&report);
        Ok(report)
    }

    /// Change the line rate on the source and the framer timing.
    pub fn set_bit_rate(&self, bit_rate: u32) -> Result<(), String> {
        if bit_rate == 0 {
            return Err("Bit rate must be greater than zero".to_string());
        }
        match self.source.lock() {
            Ok(mut src) => src.set_bit_rate(bit_rate)?,
            Err(poisoned) => poisoned.into_inner().set_bit_rate(bit_rate)?,
        }
        self.framer.set_bit_rate(bit_rate);
        Ok(())
    }

    pub fn set_timeout(&self, timeout: Duration, auto: bool) {
        self.framer.set_timeout(timeout, auto);
    }

    /// Abort delayed responses that have not fired yet.
    pub fn cancel_pending_responses(&self) -> usize {
        self.scheduler
            .as_ref()
            .map(|s| s.cancel_pending())
            .unwrap_or(0)
    }
}

fn lock_state(state: &Mutex<IOState>) -> std::sync::MutexGuard<'_, IOState> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn log_report(report: &LoadReport) {
    tlog!(
        "[harness] Loaded {} sequences ({} with invalid patterns)",
        report.loaded,
        report.invalid_patterns
    );
    for e in &report.errors {
        tlog!("[harness]   {}", e);
    }
}

/// Forward framed messages to the responder until the receive loop ends.
async fn pump_messages(
    mut rx: mpsc::Receiver<SourceMessage>,
    engine: Arc<ResponderEngine>,
    scheduler: Arc<ResponseScheduler>,
    events: EventSender,
    state: Arc<Mutex<IOState>>,
    display_format: ByteFormat,
) {
    while let Some(msg) = rx.recv().await {
        match msg {
            SourceMessage::Message(message) => {
                tlog!(
                    "[harness] RX ({} bytes): {}",
                    message.len(),
                    format_bytes(display_format, &message.bytes)
                );
                let matched = engine.check(&message.bytes);
                let _ = events.send(HarnessEvent::Received { message });

                if let Some(sequence) = matched {
                    tlog!("[responder] Matched '{}'", sequence.name());
                    let _ = events.send(HarnessEvent::Matched {
                        sequence: sequence.name().to_string(),
                        comment: sequence.comment().map(str::to_string),
                    });
                    scheduler.dispatch(sequence);
                }
            }
            SourceMessage::Error(message) => {
                let _ = events.send(HarnessEvent::Error { message });
            }
            SourceMessage::Ended(reason) => {
                tlog!("[harness] Receive loop ended: {}", reason);
                *lock_state(&state) = if reason == "stopped" {
                    IOState::Stopped
                } else {
                    IOState::Error(reason.clone())
                };
                let _ = events.send(HarnessEvent::Ended { reason });
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{EventReceiver, MemoryHandle, MemorySource};
    use crate::sequence::test_config;

    fn memory_harness() -> (Harness, MemoryHandle, EventReceiver) {
        let (source, handle) = MemorySource::new("mem");
        let engine = Arc::new(ResponderEngine::new());
        engine.load(vec![test_config("ping", "50 49 4E 47", "41 43 4B")]);
        let framer = AdaptiveFramer::new(None, Some(Duration::from_millis(20)));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let harness = Harness::new(share(source), engine, framer, events_tx);
        (harness, handle, events_rx)
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (mut harness, _handle, mut events) = memory_harness();
        assert_eq!(harness.state(), IOState::Stopped);

        harness.start().unwrap();
        assert_eq!(harness.state(), IOState::Running);
        assert!(harness.start().is_err());
        assert_eq!(
            events.recv().await,
            Some(HarnessEvent::Connected {
                device: "mem".to_string()
            })
        );

        harness.stop().await;
        harness.stop().await;
        assert_eq!(harness.state(), IOState::Stopped);
        assert_eq!(
            events.recv().await,
            Some(HarnessEvent::Ended {
                reason: "stopped".to_string()
            })
        );
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_disconnect_leaves_running_state() {
        let (mut harness, handle, mut events) = memory_harness();
        harness.start().unwrap();
        handle.unplug();

        loop {
            let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
                .await
                .expect("receive loop did not end")
                .expect("event channel closed");
            if let HarnessEvent::Ended { reason } = event {
                assert_eq!(reason, "disconnected");
                break;
            }
        }
        assert_eq!(harness.state(), IOState::Error("disconnected".to_string()));

        // Reconnecting after the loop died is allowed
        harness.start().unwrap();
        assert_eq!(harness.state(), IOState::Running);
        harness.shutdown().await;
        assert_eq!(harness.state(), IOState::Stopped);
    }

    #[tokio::test]
    async fn test_manual_transmit() {
        let (mut harness, handle, _events) = memory_harness();
        assert!(harness.transmit(vec![1]).await.is_err());

        harness.start().unwrap();
        assert_eq!(harness.send_text(ByteFormat::Ascii, "HELLO").await, Ok(5));
        assert_eq!(harness.transmit(vec![0xAA, 0x55]).await, Ok(2));
        assert!(harness.transmit(Vec::new()).await.is_err());
        assert!(harness.send_text(ByteFormat::Hex, "?? 01").await.is_err());
        assert_eq!(handle.written(), vec![b"HELLO".to_vec(), vec![0xAA, 0x55]]);
        harness.shutdown().await;
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_start_discards_stale_input() {
        let (mut harness, handle, _events) = memory_harness();
        handle.push(b"PING");
        assert_eq!(handle.pending(), 4);

        harness.start().unwrap();
        assert_eq!(handle.pending(), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.written().is_empty());
        harness.shutdown().await;
    }

    #[tokio::test]
    async fn test_transmit_times_out_when_writer_is_stuck() {
        let (source, handle) = MemorySource::new("mem");
        let source = share(source);
        let framer = AdaptiveFramer::new(None, Some(Duration::from_millis(20)));
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let mut harness = Harness::new(
            source.clone(),
            Arc::new(ResponderEngine::new()),
            framer,
            events_tx,
        );
        harness.start().unwrap();

        let (locked_tx, locked_rx) = std_mpsc::channel();
        let holder = std::thread::spawn(move || {
            let _guard = source.lock().unwrap();
            locked_tx.send(()).unwrap();
            std::thread::sleep(Duration::from_millis(800));
        });
        locked_rx.recv().unwrap();

        let err = harness.transmit(vec![0x01]).await.unwrap_err();
        assert_eq!(err, IoError::timeout("mem", "transmit").to_string());

        holder.join().unwrap();
        harness.shutdown().await;
        // The queued write still went out once the device was free
        assert_eq!(handle.written(), vec![vec![0x01]]);
    }

    #[tokio::test]
    async fn test_set_bit_rate_reaches_source_and_framer() {
        let (source, handle) = MemorySource::new("mem");
        let framer = AdaptiveFramer::new(Some(1200), None);
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let harness = Harness::new(share(source), Arc::new(ResponderEngine::new()), framer, events_tx);

        harness.set_bit_rate(600).unwrap();
        assert_eq!(handle.bit_rate(), Some(600));
        assert_eq!(harness.framer().timeout(), Duration::from_millis(50));
        assert!(harness.set_bit_rate(0).is_err());

        harness.set_timeout(Duration::from_millis(7), false);
        harness.set_bit_rate(1200).unwrap();
        assert_eq!(harness.framer().timeout(), Duration::from_millis(7));
    }

    #[tokio::test]
    async fn test_toggle_unknown_sequence() {
        let (harness, _handle, _events) = memory_harness();
        assert_eq!(harness.toggle("ping"), Ok(false));
        assert_eq!(harness.toggle("ping"), Ok(true));
        assert!(harness.toggle("nope").is_err());
    }

    #[test]
    fn test_from_settings_requires_port() {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let settings = HarnessSettings::default();
        assert!(Harness::from_settings(&settings, events_tx).is_err());
    }
}
