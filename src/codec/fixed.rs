use core::{fmt, ops::Deref};

use crate::utils::{
    ByteReader, ByteWriter, Deserializable, DeserializationError, Serializable,
    bytes_to_hex_string,
};

// FIXED BYTES
// ================================================================================================

/// An opaque block of exactly `N` bytes.
///
/// Equality, ordering and hashing are byte-wise. The serialized form is the bytes themselves.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedBytes<const N: usize>([u8; N]);

impl<const N: usize> FixedBytes<N> {
    /// The serialized size in bytes.
    pub const SERIALIZED_SIZE: usize = N;

    pub const fn new(bytes: [u8; N]) -> Self {
        Self(bytes)
    }

    pub const fn as_bytes(&self) -> &[u8; N] {
        &self.0
    }

    pub fn into_inner(self) -> [u8; N] {
        self.0
    }
}

impl<const N: usize> Default for FixedBytes<N> {
    fn default() -> Self {
        Self([0; N])
    }
}

impl<const N: usize> Deref for FixedBytes<N> {
    type Target = [u8; N];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> AsRef<[u8]> for FixedBytes<N> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl<const N: usize> From<[u8; N]> for FixedBytes<N> {
    fn from(value: [u8; N]) -> Self {
        Self(value)
    }
}

impl<const N: usize> TryFrom<&[u8]> for FixedBytes<N> {
    type Error = DeserializationError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        Self::read_from_bytes(value)
    }
}

impl<const N: usize> fmt::Debug for FixedBytes<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixedBytes<{N}>({})", bytes_to_hex_string(self.0))
    }
}

impl<const N: usize> Serializable for FixedBytes<N> {
    fn write_into<W: ByteWriter>(&self, target: &mut W) {
        target.write_bytes(&self.0);
    }

    fn get_size_hint(&self) -> usize {
        N
    }
}

impl<const N: usize> Deserializable for FixedBytes<N> {
    fn read_from<R: ByteReader>(source: &mut R) -> Result<Self, DeserializationError> {
        source.read_array().map(Self)
    }
}
