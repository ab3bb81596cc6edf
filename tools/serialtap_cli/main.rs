// tools/serialtap_cli/main.rs
//
// Command-line front end: list ports, run the auto-responder against a serial
// device, or check sequence files offline.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

use serialtap::codec::{self, format_bytes, ByteFormat};
use serialtap::io::serial::{line_summary, list_serial_ports, Parity};
use serialtap::io::HarnessEvent;
use serialtap::logging::{init_file_logging, stop_file_logging};
use serialtap::sequence::ResponderEngine;
use serialtap::settings::HarnessSettings;
use serialtap::{tlog, Harness};

#[derive(Parser)]
#[command(name = "serialtap", version, about = "Serial message framer and auto-responder")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List available serial ports
    Ports,
    /// Run the auto-responder until Ctrl-C
    Run {
        /// Serial device, e.g. /dev/ttyUSB0 or COM3
        #[arg(long)]
        port: Option<String>,
        #[arg(long)]
        baud: Option<u32>,
        #[arg(long)]
        parity: Option<Parity>,
        /// Sequences file (.toml, .json or .yml)
        #[arg(long)]
        sequences: Option<PathBuf>,
        /// Manual silence timeout; derived from the baud rate when omitted
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Display format for RX/TX bytes
        #[arg(long)]
        format: Option<ByteFormat>,
        /// Settings file (.toml, .json or .yml)
        #[arg(long)]
        settings: Option<PathBuf>,
    },
    /// Show which sequence would answer a message, and with what
    Check {
        #[arg(long)]
        sequences: PathBuf,
        #[arg(long, default_value = "hex")]
        format: ByteFormat,
        message: String,
    },
    /// Show the bytes a payload encodes to
    Encode {
        #[arg(long, default_value = "hex")]
        format: ByteFormat,
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let result = match cli.command {
        Command::Ports => list_ports(),
        Command::Run {
            port,
            baud,
            parity,
            sequences,
            timeout_ms,
            format,
            settings,
        } => {
            let loaded = match settings {
                Some(path) => HarnessSettings::load(&path).map_err(|e| e.to_string()),
                None => Ok(HarnessSettings::default()),
            };
            match loaded {
                Ok(mut s) => {
                    if port.is_some() {
                        s.port = port;
                    }
                    if let Some(baud) = baud {
                        s.baud_rate = baud;
                    }
                    if let Some(parity) = parity {
                        s.parity = parity;
                    }
                    if let Some(path) = sequences {
                        s.sequences_path = path;
                    }
                    if timeout_ms.is_some() {
                        s.message_timeout_ms = timeout_ms;
                    }
                    if let Some(format) = format {
                        s.display_format = format;
                    }
                    run(s).await
                }
                Err(e) => Err(e),
            }
        }
        Command::Check {
            sequences,
            format,
            message,
        } => check(&sequences, format, &message),
        Command::Encode { format, text } => codec::encode(format, &text)
            .map(|bytes| {
                println!("{}", format_bytes(ByteFormat::Hex, &bytes));
            })
            .map_err(|e| e.to_string()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn list_ports() -> Result<(), String> {
    let ports = list_serial_ports()?;
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for p in ports {
        let detail = match (p.vid, p.pid) {
            (Some(vid), Some(pid)) => format!(" [{:04x}:{:04x}]", vid, pid),
            _ => String::new(),
        };
        let product = p.product.map(|s| format!(" {}", s)).unwrap_or_default();
        println!("{}  {}{}{}", p.port_name, p.port_type, product, detail);
    }
    Ok(())
}

async fn run(settings: HarnessSettings) -> Result<(), String> {
    if let Some(dir) = &settings.log_dir {
        init_file_logging(dir)?;
    }

    let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut harness = Harness::from_settings(&settings, events_tx)?;
    harness.start()?;

    tlog!(
        "[cli] {} at {} baud ({}), timeout {:.1}ms{}",
        harness.device(),
        settings.baud_rate,
        line_summary(settings.data_bits, settings.parity, settings.stop_bits),
        harness.framer().timeout().as_secs_f64() * 1000.0,
        if harness.framer().is_auto() { " (auto)" } else { "" }
    );

    let display = settings.display_format;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tlog!("[cli] Interrupted");
                break;
            }
            event = events_rx.recv() => match event {
                Some(HarnessEvent::Received { message }) => {
                    println!("RX {}", format_bytes(display, &message.bytes));
                }
                Some(HarnessEvent::Matched { sequence, comment }) => match comment {
                    Some(c) => println!("   matched '{}' ({})", sequence, c),
                    None => println!("   matched '{}'", sequence),
                },
                Some(HarnessEvent::Transmitted { bytes, .. }) => {
                    println!("TX {}", format_bytes(display, &bytes));
                }
                Some(HarnessEvent::Error { message }) => eprintln!("error: {}", message),
                Some(HarnessEvent::Ended { reason }) => {
                    println!("receive loop ended: {}", reason);
                    break;
                }
                Some(HarnessEvent::Connected { .. }) => {}
                None => break,
            }
        }
    }

    harness.shutdown().await;
    stop_file_logging();
    Ok(())
}

fn check(path: &std::path::Path, format: ByteFormat, message: &str) -> Result<(), String> {
    let engine = ResponderEngine::new();
    let report = engine.load_file(path).map_err(|e| e.to_string())?;
    for e in &report.errors {
        eprintln!("warning: {}", e);
    }

    let bytes = codec::encode(format, message).map_err(|e| e.to_string())?;
    match engine.check(&bytes) {
        Some(seq) => {
            println!("matched '{}'", seq.name());
            let response = seq.response_bytes().map_err(|e| e.to_string())?;
            if seq.delay().is_zero() {
                println!("sends {}", format_bytes(ByteFormat::Hex, &response));
            } else {
                println!(
                    "sends {} after {}ms",
                    format_bytes(ByteFormat::Hex, &response),
                    seq.delay().as_millis()
                );
            }
        }
        None => println!("no sequence matches ({} loaded)", report.loaded),
    }
    Ok(())
}
