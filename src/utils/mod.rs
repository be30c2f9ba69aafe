//! Serialization re-exports and hex helpers shared by the key, value and digest types.

use core::fmt::Write;

use thiserror::Error;
pub use winter_utils::{ByteReader, ByteWriter, Deserializable, DeserializationError, Serializable};

// HEX ENCODING
// ================================================================================================

/// Renders a byte array as a `0x`-prefixed lowercase hex string.
pub fn bytes_to_hex_string<const N: usize>(data: [u8; N]) -> String {
    data.iter().fold(String::from("0x"), |mut out, byte| {
        let _ = write!(out, "{byte:02x}");
        out
    })
}

/// Errors raised while parsing `0x`-prefixed hex strings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HexParseError {
    #[error("expected {expected} hex characters including the 0x prefix, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("hex string is missing the 0x prefix")]
    MissingPrefix,
    #[error("hex string contains a character outside [0-9a-fA-F]")]
    InvalidChar,
}

/// Parses a `0x`-prefixed hex string holding exactly `N` bytes.
pub fn hex_to_bytes<const N: usize>(value: &str) -> Result<[u8; N], HexParseError> {
    let expected = 2 * N + 2;
    if value.len() != expected {
        return Err(HexParseError::InvalidLength { expected, actual: value.len() });
    }
    let digits = value.strip_prefix("0x").ok_or(HexParseError::MissingPrefix)?;

    let mut decoded = [0u8; N];
    for (byte, pair) in decoded.iter_mut().zip(digits.as_bytes().chunks_exact(2)) {
        *byte = (nibble(pair[0])? << 4) | nibble(pair[1])?;
    }
    Ok(decoded)
}

fn nibble(digit: u8) -> Result<u8, HexParseError> {
    match digit {
        b'0'..=b'9' => Ok(digit - b'0'),
        b'a'..=b'f' => Ok(digit - b'a' + 10),
        b'A'..=b'F' => Ok(digit - b'A' + 10),
        _ => Err(HexParseError::InvalidChar),
    }
}

// TESTS
// ================================================================================================
