use super::{DIGEST_BYTES, Digest};


// BLAKE3 256-BIT OUTPUT
// ================================================================================================

/// 256-bit output blake3 hasher.
#[allow(non_camel_case_types)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Blake3_256;

impl Blake3_256 {
    /// Returns a hash of the provided sequence of bytes.
    #[inline(always)]
    pub fn hash(bytes: &[u8]) -> Digest {
        Digest::new(blake3::hash(bytes).into())
    }

    /// Returns a hash of two digests. This method is intended for use in construction of
    /// Merkle trees: the result is `hash(left || right)`.
    #[inline(always)]
    pub fn merge(values: &[Digest; 2]) -> Digest {
        let mut bytes = [0u8; DIGEST_BYTES * 2];
        bytes[..DIGEST_BYTES].copy_from_slice(&values[0].as_bytes());
        bytes[DIGEST_BYTES..].copy_from_slice(&values[1].as_bytes());
        Self::hash(&bytes)
    }
}
