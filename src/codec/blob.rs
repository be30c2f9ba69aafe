use core::{fmt, ops::Deref};

use crate::utils::{ByteReader, ByteWriter, Deserializable, DeserializationError, Serializable};

/// Largest payload a [Blob] may carry.
pub const MAX_BLOB_LEN: usize = 1 << 20;

const LEN_PREFIX_BYTES: usize = 4;

// BLOB
// ================================================================================================

/// A variable-length byte string, kept for legacy keys and values whose length is not known from
/// their type.
///
/// Encoded as `[u32 big-endian length][bytes]`. Payloads longer than [MAX_BLOB_LEN] are rejected
/// when decoding.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Blob(Vec<u8>);

impl Blob {
    /// Wraps `bytes`.
    ///
    /// # Panics
    /// Panics if `bytes` is longer than [MAX_BLOB_LEN].
    pub fn new(bytes: Vec<u8>) -> Self {
        let len = bytes.len();
        assert!(len <= MAX_BLOB_LEN, "blob of {len} bytes exceeds {MAX_BLOB_LEN}");
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<&[u8]> for Blob {
    fn from(value: &[u8]) -> Self {
        Self::new(value.to_vec())
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blob(")?;
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

impl Serializable for Blob {
    fn write_into<W: ByteWriter>(&self, target: &mut W) {
        // length is bounded by MAX_BLOB_LEN, which fits in a u32
        target.write_bytes(&(self.0.len() as u32).to_be_bytes());
        target.write_bytes(&self.0);
    }

    fn get_size_hint(&self) -> usize {
        LEN_PREFIX_BYTES + self.0.len()
    }
}

impl Deserializable for Blob {
    fn read_from<R: ByteReader>(source: &mut R) -> Result<Self, DeserializationError> {
        let len = u32::from_be_bytes(source.read_array()?) as usize;
        if len > MAX_BLOB_LEN {
            return Err(DeserializationError::InvalidValue(format!(
                "blob length {len} exceeds maximum of {MAX_BLOB_LEN}"
            )));
        }
        Ok(Self(source.read_vec(len)?))
    }
}
