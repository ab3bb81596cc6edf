//! Serial test harness: silence-based message framing and pattern-driven
//! auto-response over a raw byte link.

#[macro_use]
pub mod logging;

pub mod codec;
pub mod harness;
pub mod io;
pub mod sequence;
pub mod settings;
pub mod transmit;

pub use codec::{ByteFormat, CodecError};
pub use harness::Harness;
pub use io::{ByteSource, HarnessEvent, IoError, Message};
pub use sequence::{ResponderEngine, Sequence, SequenceConfig};
pub use settings::{ConfigError, HarnessSettings};
