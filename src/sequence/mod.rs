// src/sequence/mod.rs
//
// Auto-response rules.
//
// A sequence pairs a compiled receive pattern with a send template. Records
// come from a TOML/JSON file with a top-level `sequences` array; malformed
// records are dropped individually so one bad rule never blocks the rest.

pub mod engine;
pub mod pattern;

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::codec::{self, ByteFormat, CodecError};
use crate::settings::ConfigError;

pub use engine::{EngineError, LoadReport, ResponderEngine};
pub use pattern::{BytePattern, PatternError, PatternUnit};

// ============================================================================
// Configuration Records
// ============================================================================

/// Data + format pair used for both the receive and send side of a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayloadConfig {
    #[serde(default)]
    pub data: String,
    /// Format name; parsed case-insensitively when the sequence is built
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "hex".to_string()
}

fn default_name() -> String {
    "Unnamed".to_string()
}

fn default_active() -> bool {
    true
}

/// One sequence record as written in the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Response delay in milliseconds (`delay` accepted as an alias)
    #[serde(default, alias = "delay")]
    pub delay_ms: u64,
    #[serde(default)]
    pub comment: Option<String>,
    pub receive: PayloadConfig,
    pub send: PayloadConfig,
}

/// Top-level layout of a sequences file. Records stay untyped until each is
/// validated on its own.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct SequenceFile {
    #[serde(default)]
    pub sequences: Vec<serde_json::Value>,
}

/// Convert raw records into typed configs, collecting one error per dropped
/// record.
pub fn parse_records(records: Vec<serde_json::Value>) -> (Vec<SequenceConfig>, Vec<ConfigError>) {
    let mut configs = Vec::with_capacity(records.len());
    let mut errors = Vec::new();

    for (index, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<SequenceConfig>(record) {
            Ok(cfg) => configs.push(cfg),
            Err(e) => errors.push(ConfigError::Record {
                index,
                message: e.to_string(),
            }),
        }
    }

    (configs, errors)
}

// ============================================================================
// Sequence
// ============================================================================

/// A loaded auto-response rule
#[derive(Debug)]
pub struct Sequence {
    name: String,
    active: AtomicBool,
    delay: Duration,
    comment: Option<String>,
    receive: PayloadConfig,
    send: PayloadConfig,
    pattern: Result<BytePattern, PatternError>,
}

impl Sequence {
    pub fn from_config(config: SequenceConfig) -> Self {
        let pattern = config
            .receive
            .format
            .parse::<ByteFormat>()
            .map_err(PatternError::from)
            .and_then(|format| BytePattern::compile(format, &config.receive.data));

        Sequence {
            name: config.name,
            active: AtomicBool::new(config.active),
            delay: Duration::from_millis(config.delay_ms),
            comment: config.comment.filter(|c| !c.trim().is_empty()),
            receive: config.receive,
            send: config.send,
            pattern,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Flip the active flag, returning the new state.
    pub(crate) fn toggle(&self) -> bool {
        !self.active.fetch_xor(true, Ordering::AcqRel)
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn receive(&self) -> &PayloadConfig {
        &self.receive
    }

    pub fn send(&self) -> &PayloadConfig {
        &self.send
    }

    /// The compiled pattern, or `None` when compilation failed.
    pub fn pattern(&self) -> Option<&BytePattern> {
        self.pattern.as_ref().ok()
    }

    pub fn pattern_error(&self) -> Option<&PatternError> {
        self.pattern.as_ref().err()
    }

    /// Active, has a valid pattern, and the pattern occurs in `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.is_active() && self.pattern().is_some_and(|p| p.matches(data))
    }

    /// Encode the send template. Hex/decimal/binary must be concrete bytes.
    pub fn response_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let format = self.send.format.parse::<ByteFormat>()?;
        codec::encode(format, &self.send.data)
    }
}

#[cfg(test)]
pub(crate) fn test_config(name: &str, receive_hex: &str, send_hex: &str) -> SequenceConfig {
    SequenceConfig {
        name: name.to_string(),
        active: true,
        delay_ms: 0,
        comment: None,
        receive: PayloadConfig {
            data: receive_hex.to_string(),
            format: "hex".to_string(),
        },
        send: PayloadConfig {
            data: send_hex.to_string(),
            format: "hex".to_string(),
        },
    }
}
