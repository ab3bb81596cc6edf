// src/io/serial/mod.rs
//
// Serial port source with silence-based framing.
//
// - `connection`: `ByteSource` over the serialport crate
// - `framer`: receive loop that splits the byte stream on line silence
// - `utils`: line settings (parity, data/stop bits)

pub mod connection;
pub mod framer;
pub(crate) mod utils;

pub use connection::{list_serial_ports, SerialConfig, SerialConnection, SerialPortInfo};
pub use framer::{timeout_for_bit_rate, AdaptiveFramer, SilenceFramer};
pub use utils::{line_summary, Parity};
