// src/sequence/pattern.rs
//
// Compiled receive patterns.
//
// A pattern is an ordered list of units (fixed byte or single-byte wildcard)
// and matches a message when the units occur as a contiguous run anywhere in
// it. Compilation failures are returned to the caller; a sequence holding a
// failed pattern never matches.

use crate::codec::{self, ByteFormat, CodecError, Token};
use thiserror::Error;

/// One position of a compiled pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternUnit {
    /// Must equal this byte
    Byte(u8),
    /// Matches any single byte
    Any,
}

impl PatternUnit {
    #[inline]
    fn accepts(&self, byte: u8) -> bool {
        match self {
            PatternUnit::Byte(b) => *b == byte,
            PatternUnit::Any => true,
        }
    }
}

impl From<Token> for PatternUnit {
    fn from(token: Token) -> Self {
        match token {
            Token::Byte(b) => PatternUnit::Byte(b),
            Token::Wildcard => PatternUnit::Any,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Byte matcher compiled from pattern text. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    format: ByteFormat,
    units: Vec<PatternUnit>,
}

impl BytePattern {
    /// Compile `text` written in `format`.
    pub fn compile(format: ByteFormat, text: &str) -> Result<Self, PatternError> {
        let units: Vec<PatternUnit> = codec::tokenize(format, text)?
            .into_iter()
            .map(PatternUnit::from)
            .collect();

        if units.is_empty() {
            return Err(PatternError::Empty);
        }

        Ok(BytePattern { format, units })
    }

    pub fn format(&self) -> ByteFormat {
        self.format
    }

    pub fn units(&self) -> &[PatternUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Always false for a compiled pattern.
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Offset of the first occurrence of the pattern in `data`.
    pub fn find(&self, data: &[u8]) -> Option<usize> {
        if self.units.len() > data.len() {
            return None;
        }
        data.windows(self.units.len()).position(|window| {
            window
                .iter()
                .zip(&self.units)
                .all(|(&byte, unit)| unit.accepts(byte))
        })
    }

    /// True if the pattern occurs anywhere in `data`.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.find(data).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(text: &str) -> BytePattern {
        BytePattern::compile(ByteFormat::Hex, text).unwrap()
    }

    #[test]
    fn test_hex_wildcard_matches() {
        let p = hex("AA ?? BB");
        assert!(p.matches(&[0xAA, 0x01, 0xBB]));
        assert!(p.matches(&[0xAA, 0xFF, 0xBB]));
        assert!(!p.matches(&[0xAA, 0xBB]));
    }

    #[test]
    fn test_substring_match_in_noise() {
        let p = hex("50 49 4E 47");
        assert!(p.matches(b"\x00\x13PING\r\n"));
        assert_eq!(p.find(b"xxPINGPING"), Some(2));
        assert!(!p.matches(b"PIN"));
    }

    #[test]
    fn test_binary_single_wildcard() {
        let p = BytePattern::compile(ByteFormat::Binary, "????????").unwrap();
        assert_eq!(p.units(), &[PatternUnit::Any]);
        for b in [0x00u8, 0x5A, 0xFF] {
            assert!(p.matches(&[b]));
        }
        assert!(!p.matches(&[]));

        let two = BytePattern::compile(ByteFormat::Binary, "???????? 00000001").unwrap();
        assert!(!two.matches(&[0x01]));
        assert!(two.matches(&[0x99, 0x01]));
    }

    #[test]
    fn test_decimal_pattern() {
        let p = BytePattern::compile(ByteFormat::Decimal, "2 ?? 3").unwrap();
        assert!(p.matches(&[9, 2, 200, 3]));
        assert!(!p.matches(&[2, 3]));
    }

    #[test]
    fn test_ascii_wildcard_matches_any_byte() {
        let p = BytePattern::compile(ByteFormat::Ascii, "OK??").unwrap();
        assert!(p.matches(b"OK1"));
        assert!(p.matches(b"OK\n"));
        assert!(p.matches(b"OK\xFF"));
        assert!(!p.matches(b"OK"));
    }

    #[test]
    fn test_ascii_regex_metacharacters_are_literal() {
        let p = BytePattern::compile(ByteFormat::Ascii, "a.b*").unwrap();
        assert!(p.matches(b"xa.b*"));
        assert!(!p.matches(b"axbb"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert_eq!(
            BytePattern::compile(ByteFormat::Hex, "  "),
            Err(PatternError::Empty)
        );
        assert!(matches!(
            BytePattern::compile(ByteFormat::Hex, "AA GG"),
            Err(PatternError::Codec(CodecError::InvalidUnit { .. }))
        ));
        assert!(matches!(
            BytePattern::compile(ByteFormat::Binary, "0101"),
            Err(PatternError::Codec(CodecError::BinaryLength { len: 4 }))
        ));
    }

    #[test]
    fn test_multi_byte_hex_unit_is_invalid() {
        assert!(matches!(
            BytePattern::compile(ByteFormat::Hex, "414243"),
            Err(PatternError::Codec(CodecError::InvalidUnit { .. }))
        ));
        assert!(BytePattern::compile(ByteFormat::Hex, "41 42 43").is_ok());
    }
}
