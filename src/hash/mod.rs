//! Hash digests and the hash function used to commit to tree nodes.

use core::{fmt, ops::Deref};

use crate::utils::{
    ByteReader, ByteWriter, Deserializable, DeserializationError, Serializable, bytes_to_hex_string,
};

/// BLAKE3 hash function.
pub mod blake;

pub use blake::Blake3_256;

// CONSTANTS
// ================================================================================================

/// Number of bytes in a [Digest].
pub const DIGEST_BYTES: usize = 32;

/// Hash used in place of an absent child when hashing an internal node.
pub const NULL_DIGEST: Digest = Digest::new([0; DIGEST_BYTES]);

// DIGEST
// ================================================================================================

/// A 256-bit hash digest of a tree node.
#[derive(Default, Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Digest([u8; DIGEST_BYTES]);

impl Digest {
    /// The serialized size of the digest in bytes.
    pub const SERIALIZED_SIZE: usize = DIGEST_BYTES;

    /// Creates a new digest from raw bytes.
    pub const fn new(bytes: [u8; DIGEST_BYTES]) -> Self {
        Self(bytes)
    }

    /// Returns the digest as a byte array.
    pub const fn as_bytes(&self) -> [u8; DIGEST_BYTES] {
        self.0
    }

    /// Returns hexadecimal representation of this digest prefixed with `0x`.
    pub fn to_hex(&self) -> String {
        bytes_to_hex_string(self.0)
    }
}

impl Deref for Digest {
    type Target = [u8; DIGEST_BYTES];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<[u8; DIGEST_BYTES]> for Digest {
    fn from(value: [u8; DIGEST_BYTES]) -> Self {
        Self(value)
    }
}

impl From<Digest> for [u8; DIGEST_BYTES] {
    fn from(value: Digest) -> Self {
        value.0
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl Serializable for Digest {
    fn write_into<W: ByteWriter>(&self, target: &mut W) {
        target.write_bytes(&self.0);
    }

    fn get_size_hint(&self) -> usize {
        Self::SERIALIZED_SIZE
    }
}

impl Deserializable for Digest {
    fn read_from<R: ByteReader>(source: &mut R) -> Result<Self, DeserializationError> {
        source.read_array().map(Self)
    }
}
