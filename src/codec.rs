// src/codec.rs
//
// Text <-> byte conversion for the four user-facing byte formats.
//
// The same tokenizer backs receive-pattern compilation (wildcards allowed)
// and response/manual-send encoding (wildcards rejected). `format_bytes`
// renders bytes back into a format for RX/TX log lines.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Wildcard token in hex, decimal and ascii text
pub const WILDCARD: &str = "??";

/// Wildcard chunk in binary text (one whole byte)
pub const BINARY_WILDCARD: &str = "????????";

// ============================================================================
// Types
// ============================================================================

/// Text encoding of a byte sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteFormat {
    /// Whitespace separated hex values, e.g. `AA 0x01 ff`
    #[default]
    Hex,
    /// Literal 7-bit ASCII text
    Ascii,
    /// Whitespace separated decimal values 0-255
    Decimal,
    /// 8-character chunks of `0`/`1`, whitespace ignored
    Binary,
}

impl ByteFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ByteFormat::Hex => "hex",
            ByteFormat::Ascii => "ascii",
            ByteFormat::Decimal => "decimal",
            ByteFormat::Binary => "binary",
        }
    }
}

impl fmt::Display for ByteFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByteFormat {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "hex" => Ok(ByteFormat::Hex),
            "ascii" => Ok(ByteFormat::Ascii),
            "decimal" => Ok(ByteFormat::Decimal),
            "binary" => Ok(ByteFormat::Binary),
            other => Err(CodecError::UnknownFormat(other.to_string())),
        }
    }
}

/// One position of tokenized text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    Byte(u8),
    Wildcard,
}

/// Conversion failure for pattern or response text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("unknown byte format '{0}' (expected hex, ascii, decimal or binary)")]
    UnknownFormat(String),

    #[error("invalid {format} unit '{unit}': {reason}")]
    InvalidUnit {
        format: ByteFormat,
        unit: String,
        reason: &'static str,
    },

    #[error("binary text has {len} digits, not a multiple of 8")]
    BinaryLength { len: usize },

    #[error("non-ASCII character '{0}' in ascii text")]
    NonAscii(char),

    #[error("wildcard '{token}' is not allowed in {format} send data")]
    WildcardNotAllowed { format: ByteFormat, token: &'static str },
}

impl CodecError {
    fn invalid(format: ByteFormat, unit: &str, reason: &'static str) -> Self {
        CodecError::InvalidUnit {
            format,
            unit: unit.to_string(),
            reason,
        }
    }
}

// ============================================================================
// Tokenizing
// ============================================================================

/// Split `text` into byte/wildcard tokens according to `format`.
///
/// Any malformed unit fails the whole text. Empty (or all-whitespace) text
/// yields an empty token list.
pub fn tokenize(format: ByteFormat, text: &str) -> Result<Vec<Token>, CodecError> {
    match format {
        ByteFormat::Hex => tokenize_hex(text, false),
        ByteFormat::Decimal => text
            .split_whitespace()
            .map(|unit| {
                if unit == WILDCARD {
                    Ok(Token::Wildcard)
                } else {
                    parse_decimal_unit(unit).map(Token::Byte)
                }
            })
            .collect(),
        ByteFormat::Binary => {
            let digits: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
            if digits.len() % 8 != 0 {
                return Err(CodecError::BinaryLength { len: digits.len() });
            }
            digits
                .chunks(8)
                .map(|chunk| {
                    let unit: String = chunk.iter().collect();
                    if unit == BINARY_WILDCARD {
                        Ok(Token::Wildcard)
                    } else {
                        parse_binary_unit(&unit).map(Token::Byte)
                    }
                })
                .collect()
        }
        ByteFormat::Ascii => {
            let mut tokens = Vec::with_capacity(text.len());
            let mut chars = text.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '?' && chars.peek() == Some(&'?') {
                    chars.next();
                    tokens.push(Token::Wildcard);
                } else if c.is_ascii() {
                    tokens.push(Token::Byte(c as u8));
                } else {
                    return Err(CodecError::NonAscii(c));
                }
            }
            Ok(tokens)
        }
    }
}

/// Hex units are whitespace separated. With `allow_runs`, a unit longer
/// than two digits is a run of bytes (even digit count); otherwise it is
/// malformed.
fn tokenize_hex(text: &str, allow_runs: bool) -> Result<Vec<Token>, CodecError> {
    let mut tokens = Vec::new();
    for unit in text.split_whitespace() {
        if unit == WILDCARD {
            tokens.push(Token::Wildcard);
        } else {
            tokens.extend(parse_hex_unit(unit, allow_runs)?.into_iter().map(Token::Byte));
        }
    }
    Ok(tokens)
}

/// One byte (1-2 digits), or a run of bytes when `allow_runs` is set.
/// Optionally prefixed with `0x`.
fn parse_hex_unit(unit: &str, allow_runs: bool) -> Result<Vec<u8>, CodecError> {
    let digits = unit
        .strip_prefix("0x")
        .or_else(|| unit.strip_prefix("0X"))
        .unwrap_or(unit);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CodecError::invalid(ByteFormat::Hex, unit, "not a hex value"));
    }

    if digits.len() <= 2 {
        u8::from_str_radix(digits, 16)
            .map(|b| vec![b])
            .map_err(|_| CodecError::invalid(ByteFormat::Hex, unit, "not a hex value"))
    } else if !allow_runs {
        Err(CodecError::invalid(
            ByteFormat::Hex,
            unit,
            "more than one byte in a pattern unit",
        ))
    } else if digits.len() % 2 == 0 {
        hex::decode(digits)
            .map_err(|_| CodecError::invalid(ByteFormat::Hex, unit, "not a hex value"))
    } else {
        Err(CodecError::invalid(
            ByteFormat::Hex,
            unit,
            "odd number of hex digits",
        ))
    }
}

fn parse_decimal_unit(unit: &str) -> Result<u8, CodecError> {
    if !unit.chars().all(|c| c.is_ascii_digit()) {
        return Err(CodecError::invalid(
            ByteFormat::Decimal,
            unit,
            "not a decimal number",
        ));
    }
    unit.parse::<u8>()
        .map_err(|_| CodecError::invalid(ByteFormat::Decimal, unit, "out of range 0-255"))
}

fn parse_binary_unit(unit: &str) -> Result<u8, CodecError> {
    if !unit.chars().all(|c| c == '0' || c == '1') {
        return Err(CodecError::invalid(
            ByteFormat::Binary,
            unit,
            "expected 8 binary digits or ????????",
        ));
    }
    u8::from_str_radix(unit, 2).map_err(|_| {
        CodecError::invalid(ByteFormat::Binary, unit, "expected 8 binary digits")
    })
}

// ============================================================================
// Encoding / Formatting
// ============================================================================

/// Encode send text into concrete bytes.
///
/// Hex, decimal and binary reject wildcards. Hex units may be digit runs
/// (`414243`). Ascii is literal: `??` is two question marks.
pub fn encode(format: ByteFormat, text: &str) -> Result<Vec<u8>, CodecError> {
    if format == ByteFormat::Ascii {
        if let Some(c) = text.chars().find(|c| !c.is_ascii()) {
            return Err(CodecError::NonAscii(c));
        }
        return Ok(text.as_bytes().to_vec());
    }

    let tokens = match format {
        ByteFormat::Hex => tokenize_hex(text, true)?,
        _ => tokenize(format, text)?,
    };
    tokens
        .into_iter()
        .map(|token| match token {
            Token::Byte(b) => Ok(b),
            Token::Wildcard => Err(CodecError::WildcardNotAllowed {
                format,
                token: if format == ByteFormat::Binary {
                    BINARY_WILDCARD
                } else {
                    WILDCARD
                },
            }),
        })
        .collect()
}

/// Render bytes in `format`. Hex/decimal/binary output is accepted by `encode`.
/// Ascii output escapes non-printable bytes (`\r`, `\n`, `\t`, `\xNN`).
pub fn format_bytes(format: ByteFormat, bytes: &[u8]) -> String {
    match format {
        ByteFormat::Hex => bytes
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" "),
        ByteFormat::Decimal => bytes
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(" "),
        ByteFormat::Binary => bytes
            .iter()
            .map(|b| format!("{:08b}", b))
            .collect::<Vec<_>>()
            .join(" "),
        ByteFormat::Ascii => {
            let mut out = String::with_capacity(bytes.len());
            for &b in bytes {
                match b {
                    b'\r' => out.push_str("\\r"),
                    b'\n' => out.push_str("\\n"),
                    b'\t' => out.push_str("\\t"),
                    b'\\' => out.push_str("\\\\"),
                    0x20..=0x7E => out.push(b as char),
                    _ => out.push_str(&format!("\\x{:02X}", b)),
                }
            }
            out
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_str_case_insensitive() {
        assert_eq!("HEX".parse::<ByteFormat>(), Ok(ByteFormat::Hex));
        assert_eq!(" Binary ".parse::<ByteFormat>(), Ok(ByteFormat::Binary));
        assert!(matches!(
            "octal".parse::<ByteFormat>(),
            Err(CodecError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_format_serde_lowercase() {
        let f: ByteFormat = serde_json::from_str("\"decimal\"").unwrap();
        assert_eq!(f, ByteFormat::Decimal);
        assert_eq!(serde_json::to_string(&ByteFormat::Ascii).unwrap(), "\"ascii\"");
    }

    #[test]
    fn test_tokenize_hex_with_wildcard() {
        let tokens = tokenize(ByteFormat::Hex, "AA ?? 0xbb").unwrap();
        assert_eq!(
            tokens,
            vec![Token::Byte(0xAA), Token::Wildcard, Token::Byte(0xBB)]
        );
    }

    #[test]
    fn test_tokenize_hex_single_digit() {
        assert_eq!(
            tokenize(ByteFormat::Hex, "41 F").unwrap(),
            vec![Token::Byte(0x41), Token::Byte(0x0F)]
        );
    }

    #[test]
    fn test_hex_runs_only_when_encoding() {
        assert!(matches!(
            tokenize(ByteFormat::Hex, "414243"),
            Err(CodecError::InvalidUnit { .. })
        ));
        assert_eq!(
            encode(ByteFormat::Hex, "414243 F").unwrap(),
            vec![0x41, 0x42, 0x43, 0x0F]
        );
        assert!(encode(ByteFormat::Hex, "41424").is_err());
    }

    #[test]
    fn test_tokenize_hex_rejects_garbage() {
        assert!(tokenize(ByteFormat::Hex, "AA ZZ").is_err());
        assert!(tokenize(ByteFormat::Hex, "ABC").is_err());
        assert!(tokenize(ByteFormat::Hex, "0x").is_err());
        assert!(tokenize(ByteFormat::Hex, "+1").is_err());
    }

    #[test]
    fn test_tokenize_decimal() {
        assert_eq!(
            tokenize(ByteFormat::Decimal, "0 ?? 255").unwrap(),
            vec![Token::Byte(0), Token::Wildcard, Token::Byte(255)]
        );
        assert!(tokenize(ByteFormat::Decimal, "256").is_err());
        assert!(tokenize(ByteFormat::Decimal, "-1").is_err());
        assert!(tokenize(ByteFormat::Decimal, "1a").is_err());
    }

    #[test]
    fn test_tokenize_binary() {
        assert_eq!(
            tokenize(ByteFormat::Binary, "1010 1010 ????????").unwrap(),
            vec![Token::Byte(0xAA), Token::Wildcard]
        );
        assert_eq!(
            tokenize(ByteFormat::Binary, "1010101"),
            Err(CodecError::BinaryLength { len: 7 })
        );
        assert!(tokenize(ByteFormat::Binary, "1010????").is_err());
        assert!(tokenize(ByteFormat::Binary, "10102010").is_err());
    }

    #[test]
    fn test_tokenize_ascii_wildcard() {
        assert_eq!(
            tokenize(ByteFormat::Ascii, "A??B?").unwrap(),
            vec![
                Token::Byte(b'A'),
                Token::Wildcard,
                Token::Byte(b'B'),
                Token::Byte(b'?')
            ]
        );
        assert_eq!(
            tokenize(ByteFormat::Ascii, "café"),
            Err(CodecError::NonAscii('é'))
        );
    }

    #[test]
    fn test_encode_rejects_wildcards() {
        assert!(matches!(
            encode(ByteFormat::Hex, "AA ??"),
            Err(CodecError::WildcardNotAllowed { .. })
        ));
        assert!(matches!(
            encode(ByteFormat::Binary, "????????"),
            Err(CodecError::WildcardNotAllowed {
                token: BINARY_WILDCARD,
                ..
            })
        ));
    }

    #[test]
    fn test_encode_ascii_is_literal() {
        assert_eq!(encode(ByteFormat::Ascii, "OK??\r").unwrap(), b"OK??\r".to_vec());
    }

    #[test]
    fn test_encode_empty_text() {
        assert_eq!(encode(ByteFormat::Hex, "   ").unwrap(), Vec::<u8>::new());
        assert_eq!(encode(ByteFormat::Ascii, "").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_encode_format_roundtrip() {
        let bytes = vec![0x00, 0x41, 0x7F, 0x80, 0xFF];
        for format in [ByteFormat::Hex, ByteFormat::Decimal, ByteFormat::Binary] {
            let text = format_bytes(format, &bytes);
            assert_eq!(encode(format, &text).unwrap(), bytes, "format {}", format);
        }
    }

    #[test]
    fn test_format_bytes_display() {
        let bytes = [0x41, 0x43, 0x4B, 0x0D, 0x0A, 0x01];
        assert_eq!(format_bytes(ByteFormat::Hex, &bytes), "41 43 4B 0D 0A 01");
        assert_eq!(format_bytes(ByteFormat::Decimal, &bytes[..3]), "65 67 75");
        assert_eq!(format_bytes(ByteFormat::Binary, &bytes[..1]), "01000001");
        assert_eq!(format_bytes(ByteFormat::Ascii, &bytes), "ACK\\r\\n\\x01");
    }
}
