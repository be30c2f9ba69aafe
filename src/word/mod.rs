//! A [Word256] type used for storage slot keys and values, and associated utilities.

use core::{
    fmt::{self, Display},
    ops::Deref,
};

use thiserror::Error;

use crate::utils::{
    ByteReader, ByteWriter, Deserializable, DeserializationError, HexParseError, Serializable,
    bytes_to_hex_string, hex_to_bytes,
};

#[cfg(test)]
mod tests;

const WORD_SIZE_BYTES: usize = 32;

// WORD
// ================================================================================================

/// A 256-bit word stored as 32 big-endian bytes.
///
/// Because the layout is big-endian, byte-wise ordering is the same as numeric ordering.
#[derive(Default, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Word256([u8; WORD_SIZE_BYTES]);

impl Word256 {
    /// The serialized size of the word in bytes.
    pub const SERIALIZED_SIZE: usize = WORD_SIZE_BYTES;

    /// The all-zero word.
    pub const ZERO: Self = Self([0; WORD_SIZE_BYTES]);

    /// Creates a new [`Word256`] from its big-endian bytes.
    pub const fn new(bytes: [u8; WORD_SIZE_BYTES]) -> Self {
        Self(bytes)
    }

    /// Creates a word whose numeric value is `value`.
    pub const fn from_u64(value: u64) -> Self {
        let mut bytes = [0; WORD_SIZE_BYTES];
        let tail = value.to_be_bytes();
        let mut i = 0;
        while i < 8 {
            bytes[WORD_SIZE_BYTES - 8 + i] = tail[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Creates a word whose numeric value is `value`.
    pub const fn from_u128(value: u128) -> Self {
        let mut bytes = [0; WORD_SIZE_BYTES];
        let tail = value.to_be_bytes();
        let mut i = 0;
        while i < 16 {
            bytes[WORD_SIZE_BYTES - 16 + i] = tail[i];
            i += 1;
        }
        Self(bytes)
    }

    /// Returns the low 64 bits of the word, or `None` if any higher bit is set.
    pub fn to_u64(&self) -> Option<u64> {
        if self.0[..WORD_SIZE_BYTES - 8].iter().any(|&b| b != 0) {
            return None;
        }
        let mut tail = [0u8; 8];
        tail.copy_from_slice(&self.0[WORD_SIZE_BYTES - 8..]);
        Some(u64::from_be_bytes(tail))
    }

    /// Returns true if every byte of the word is zero.
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Returns the word as a byte array.
    pub const fn as_bytes(&self) -> [u8; WORD_SIZE_BYTES] {
        self.0
    }

    /// Returns hexadecimal representation of this word prefixed with `0x`.
    pub fn to_hex(&self) -> String {
        bytes_to_hex_string(self.0)
    }
}

impl Deref for Word256 {
    type Target = [u8; WORD_SIZE_BYTES];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Word256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for Word256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Word256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word256({})", self.to_hex())
    }
}

// CONVERSIONS: INTO WORD
// ================================================================================================

/// Errors that can occur when building a [Word256] from external data.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WordError {
    /// Hex-encoded data could not be parsed.
    #[error("hex encoded word is invalid")]
    HexParse(#[from] HexParseError),
    /// The byte slice did not hold exactly 32 bytes.
    #[error("expected {expected} bytes for a word, found {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

impl From<[u8; WORD_SIZE_BYTES]> for Word256 {
    fn from(value: [u8; WORD_SIZE_BYTES]) -> Self {
        Self(value)
    }
}

impl From<u64> for Word256 {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<u128> for Word256 {
    fn from(value: u128) -> Self {
        Self::from_u128(value)
    }
}

impl TryFrom<&[u8]> for Word256 {
    type Error = WordError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; WORD_SIZE_BYTES] = value.try_into().map_err(|_| {
            WordError::InvalidLength { expected: WORD_SIZE_BYTES, actual: value.len() }
        })?;
        Ok(Self(bytes))
    }
}

impl TryFrom<&str> for Word256 {
    type Error = WordError;

    /// Parses a `0x`-prefixed, 64-digit hex string.
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Ok(Self(hex_to_bytes(value)?))
    }
}

// CONVERSIONS: FROM WORD
// ================================================================================================

impl From<Word256> for [u8; WORD_SIZE_BYTES] {
    fn from(value: Word256) -> Self {
        value.0
    }
}

impl From<&Word256> for String {
    fn from(value: &Word256) -> Self {
        value.to_hex()
    }
}

// SERIALIZATION / DESERIALIZATION
// ================================================================================================

impl Serializable for Word256 {
    fn write_into<W: ByteWriter>(&self, target: &mut W) {
        target.write_bytes(&self.0);
    }

    fn get_size_hint(&self) -> usize {
        Self::SERIALIZED_SIZE
    }
}

impl Deserializable for Word256 {
    fn read_from<R: ByteReader>(source: &mut R) -> Result<Self, DeserializationError> {
        source.read_array().map(Self)
    }
}
