// src/settings.rs
//
// Harness settings and config-file helpers.
//
// Settings live in a TOML file; every field has a serde default so a partial
// (or missing) file still yields a usable configuration.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::codec::ByteFormat;
use crate::io::serial::Parity;

/// Configuration load failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    #[error("failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("unsupported config file type '{0}' (expected .toml, .json or .yml)")]
    UnsupportedFormat(String),

    #[error("sequence #{index}: {message}")]
    Record { index: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Serial device path, e.g. `/dev/ttyUSB0` or `COM3`
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default)]
    pub parity: Parity,
    /// Manual silence timeout; when unset it is derived from `baud_rate`
    #[serde(default)]
    pub message_timeout_ms: Option<u64>,
    #[serde(default = "default_sequences_path")]
    pub sequences_path: PathBuf,
    /// Directory for timestamped log files (stderr only when unset)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Format used when printing RX/TX bytes
    #[serde(default)]
    pub display_format: ByteFormat,
}

fn default_baud_rate() -> u32 {
    57600
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_sequences_path() -> PathBuf {
    PathBuf::from("sequences.toml")
}

impl Default for HarnessSettings {
    fn default() -> Self {
        HarnessSettings {
            port: None,
            baud_rate: default_baud_rate(),
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::default(),
            message_timeout_ms: None,
            sequences_path: default_sequences_path(),
            log_dir: None,
            display_format: ByteFormat::default(),
        }
    }
}

impl HarnessSettings {
    /// Load settings from a TOML, JSON or YAML file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(HarnessSettings::default());
        }
        read_config_file(path)
    }

    pub fn message_timeout(&self) -> Option<Duration> {
        self.message_timeout_ms.map(Duration::from_millis)
    }
}

/// Read and deserialize a `.toml`, `.json` or `.yml`/`.yaml` file.
pub fn read_config_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let display = path.display().to_string();
    let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: display.clone(),
        message: e.to_string(),
    })?;

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "toml" => toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: display,
            message: e.to_string(),
        }),
        "json" => serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: display,
            message: e.to_string(),
        }),
        "yml" | "yaml" => serde_yaml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: display,
            message: e.to_string(),
        }),
        other => Err(ConfigError::UnsupportedFormat(other.to_string())),
    }
}

#[cfg(test)]
pub(crate) fn temp_config_path(stem: &str, ext: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "serialtap-{}-{}-{}.{}",
        stem,
        std::process::id(),
        n,
        ext
    ))
}
