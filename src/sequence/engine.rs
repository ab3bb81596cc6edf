// src/sequence/engine.rs
//
// Ordered sequence collection and first-match lookup.
//
// The collection is an `Arc` snapshot swapped wholesale on load/reload. A
// matcher that cloned the old snapshot keeps evaluating against it; nothing
// is ever edited in place except each sequence's atomic active flag.

use std::path::Path;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use super::{parse_records, Sequence, SequenceConfig, SequenceFile};
use crate::settings::{read_config_file, ConfigError};

pub type SequenceSnapshot = Arc<Vec<Arc<Sequence>>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("no sequence named '{0}'")]
    UnknownSequence(String),
}

/// Outcome of a load: how many sequences are live and what was reported.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Sequences in the new collection (including ones with invalid patterns)
    pub loaded: usize,
    /// Sequences whose receive pattern failed to compile
    pub invalid_patterns: usize,
    /// One message per dropped record or invalid pattern
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ResponderEngine {
    sequences: RwLock<SequenceSnapshot>,
}

impl ResponderEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole collection with sequences built from `configs`.
    pub fn load(&self, configs: Vec<SequenceConfig>) -> LoadReport {
        let mut report = LoadReport::default();
        let sequences: Vec<Arc<Sequence>> = configs
            .into_iter()
            .map(|cfg| {
                let seq = Sequence::from_config(cfg);
                if let Some(e) = seq.pattern_error() {
                    tlog!(
                        "[responder] Sequence '{}' has an invalid receive pattern: {}",
                        seq.name(),
                        e
                    );
                    report.invalid_patterns += 1;
                    report.errors.push(format!("{}: {}", seq.name(), e));
                }
                Arc::new(seq)
            })
            .collect();

        report.loaded = sequences.len();
        self.swap(sequences);

        tlog!(
            "[responder] Loaded {} sequences ({} active)",
            report.loaded,
            self.active_sequences().len()
        );
        report
    }

    /// Hot-reload entry point; identical to `load`.
    pub fn reload(&self, configs: Vec<SequenceConfig>) -> LoadReport {
        self.load(configs)
    }

    /// Load untyped records, dropping any that fail to deserialize.
    pub fn load_records(&self, records: Vec<serde_json::Value>) -> LoadReport {
        let (configs, dropped) = parse_records(records);
        for e in &dropped {
            tlog!("[responder] Dropping {}", e);
        }

        let mut report = self.load(configs);
        let mut errors: Vec<String> = dropped.iter().map(|e| e.to_string()).collect();
        errors.append(&mut report.errors);
        report.errors = errors;
        report
    }

    /// Load a `.toml`, `.json` or `.yml` sequences file.
    ///
    /// A missing file loads an empty collection. A file that cannot be read or
    /// parsed also empties the collection and returns the error.
    pub fn load_file(&self, path: &Path) -> Result<LoadReport, ConfigError> {
        if !path.exists() {
            tlog!(
                "[responder] No sequence file at {}, auto-response disabled",
                path.display()
            );
            return Ok(self.load(Vec::new()));
        }

        match read_config_file::<SequenceFile>(path) {
            Ok(file) => {
                tlog!("[responder] Found sequence file {}", path.display());
                Ok(self.load_records(file.sequences))
            }
            Err(e) => {
                tlog!("[responder] Error loading sequences: {}", e);
                self.swap(Vec::new());
                Err(e)
            }
        }
    }

    fn swap(&self, sequences: Vec<Arc<Sequence>>) {
        let next = Arc::new(sequences);
        match self.sequences.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    /// Current collection. Stays valid (and unchanged) across later reloads.
    pub fn snapshot(&self) -> SequenceSnapshot {
        match self.sequences.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// First active sequence, in configuration order, whose pattern occurs in
    /// `data`.
    pub fn check(&self, data: &[u8]) -> Option<Arc<Sequence>> {
        self.snapshot().iter().find(|s| s.matches(data)).cloned()
    }

    /// Toggle the first sequence named `name`; returns its new active state.
    pub fn toggle(&self, name: &str) -> Result<bool, EngineError> {
        let seq = self
            .sequence(name)
            .ok_or_else(|| EngineError::UnknownSequence(name.to_string()))?;
        let active = seq.toggle();
        tlog!(
            "[responder] Sequence '{}' {}",
            name,
            if active { "enabled" } else { "disabled" }
        );
        Ok(active)
    }

    pub fn sequence(&self, name: &str) -> Option<Arc<Sequence>> {
        self.snapshot().iter().find(|s| s.name() == name).cloned()
    }

    pub fn active_sequences(&self) -> Vec<Arc<Sequence>> {
        self.snapshot()
            .iter()
            .filter(|s| s.is_active())
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::test_config;
    use crate::settings::temp_config_path;
    use serde_json::json;

    fn engine_with(configs: Vec<SequenceConfig>) -> ResponderEngine {
        let engine = ResponderEngine::new();
        engine.load(configs);
        engine
    }

    #[test]
    fn test_first_match_wins() {
        let engine = engine_with(vec![
            test_config("specific", "AA 01", "01"),
            test_config("generic", "AA ??", "02"),
        ]);
        assert_eq!(engine.check(&[0xAA, 0x01]).unwrap().name(), "specific");
        assert_eq!(engine.check(&[0xAA, 0x02]).unwrap().name(), "generic");
        assert!(engine.check(&[0xBB]).is_none());
    }

    #[test]
    fn test_toggle_skips_and_restores() {
        let engine = engine_with(vec![
            test_config("first", "01", "AA"),
            test_config("second", "01", "BB"),
        ]);
        assert_eq!(engine.toggle("first"), Ok(false));
        assert_eq!(engine.check(&[0x01]).unwrap().name(), "second");
        assert_eq!(engine.active_sequences().len(), 1);

        assert_eq!(engine.toggle("first"), Ok(true));
        assert_eq!(engine.check(&[0x01]).unwrap().name(), "first");
    }

    #[test]
    fn test_toggle_unknown_name() {
        let engine = engine_with(vec![test_config("a", "01", "02")]);
        assert_eq!(
            engine.toggle("missing"),
            Err(EngineError::UnknownSequence("missing".to_string()))
        );
    }

    #[test]
    fn test_invalid_pattern_is_skipped() {
        let engine = engine_with(vec![
            test_config("broken", "01 QQ", "AA"),
            test_config("fallback", "01", "BB"),
        ]);
        assert_eq!(engine.len(), 2);
        assert_eq!(engine.check(&[0x01, 0x02]).unwrap().name(), "fallback");
    }

    #[test]
    fn test_reload_replaces_collection_and_keeps_snapshot() {
        let engine = engine_with(vec![test_config("old", "01", "02")]);
        let before = engine.snapshot();
        let stale = engine.sequence("old").unwrap();

        let report = engine.reload(vec![test_config("new", "03", "04")]);
        assert_eq!(report.loaded, 1);

        assert_eq!(before.len(), 1);
        assert_eq!(before[0].name(), "old");
        assert!(engine.sequence("old").is_none());
        assert!(engine.check(&[0x01]).is_none());
        assert_eq!(engine.check(&[0x03]).unwrap().name(), "new");

        // A stale handle no longer affects the live collection
        assert!(!stale.toggle());
        assert_eq!(engine.check(&[0x03]).unwrap().name(), "new");
    }

    #[test]
    fn test_load_records_reports_dropped_and_invalid() {
        let engine = ResponderEngine::new();
        let report = engine.load_records(vec![
            json!({"name": "a", "receive": {"data": "01"}, "send": {"data": "02"}}),
            json!({"name": "b"}),
            json!({"name": "c", "receive": {"data": "ZZ"}, "send": {"data": "02"}}),
        ]);
        assert_eq!(report.loaded, 2);
        assert_eq!(report.invalid_patterns, 1);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].starts_with("sequence #1"));
        assert!(report.errors[1].starts_with("c:"));
    }

    #[test]
    fn test_load_toml_file() {
        let path = temp_config_path("sequences", "toml");
        std::fs::write(
            &path,
            r#"
            [[sequences]]
            name = "ping"
            comment = "device says PING"
            receive = { data = "PING", format = "ascii" }
            send = { data = "41 43 4B", format = "hex" }

            [[sequences]]
            name = "status"
            active = false
            delay = 100
            receive = { data = "10 ?? 03" }
            send = { data = "6 0 0", format = "decimal" }
            "#,
        )
        .unwrap();

        let engine = ResponderEngine::new();
        let report = engine.load_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(report.loaded, 2);
        assert!(report.errors.is_empty());
        let ping = engine.check(b"xPINGx").unwrap();
        assert_eq!(ping.comment(), Some("device says PING"));
        assert_eq!(ping.response_bytes().unwrap(), b"ACK".to_vec());

        let status = engine.sequence("status").unwrap();
        assert!(!status.is_active());
        assert_eq!(status.delay().as_millis(), 100);
    }

    #[test]
    fn test_load_yaml_file() {
        let path = temp_config_path("sequences", "yml");
        std::fs::write(
            &path,
            "sequences:\n  - name: ping\n    receive:\n      data: \"50 49 4E 47\"\n      format: hex\n    send:\n      data: \"41 43 4B\"\n      format: hex\n    delay: 0\n  - name: broken\n",
        )
        .unwrap();

        let engine = ResponderEngine::new();
        let report = engine.load_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(report.loaded, 1);
        assert_eq!(report.errors.len(), 1);
        let ping = engine.check(b"PING").unwrap();
        assert_eq!(ping.response_bytes().unwrap(), b"ACK".to_vec());
    }

    #[test]
    fn test_load_missing_file_empties_collection() {
        let engine = engine_with(vec![test_config("a", "01", "02")]);
        let path = temp_config_path("no-such-sequences", "toml");
        let report = engine.load_file(&path).unwrap();
        assert_eq!(report.loaded, 0);
        assert!(engine.is_empty());
    }

    #[test]
    fn test_load_unparseable_file_empties_collection() {
        let engine = engine_with(vec![test_config("a", "01", "02")]);
        let path = temp_config_path("bad-sequences", "json");
        std::fs::write(&path, "{ not json").unwrap();
        let result = engine.load_file(&path);
        let _ = std::fs::remove_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
        assert!(engine.is_empty());
    }
}
